use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Money in the smallest currency unit.
pub type Cents = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for untrusted input.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// `[s1,e1)` and `[s2,e2)` overlap iff `s1 < e2 && s2 < e1`. Touching is not overlapping.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Intersection with `bounds`, if non-empty.
    pub fn clamp_to(&self, bounds: &Span) -> Option<Span> {
        Span::try_new(self.start.max(bounds.start), self.end.min(bounds.end))
    }
}

// ── Enumerations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Driver,
    Homeowner,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Driver => "driver",
            Role::Homeowner => "homeowner",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "driver" => Some(Role::Driver),
            "homeowner" => Some(Role::Homeowner),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpotStatus {
    PendingVerification,
    Active,
    Inactive,
    Rejected,
}

impl SpotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpotStatus::PendingVerification => "pending_verification",
            SpotStatus::Active => "active",
            SpotStatus::Inactive => "inactive",
            SpotStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending_verification" => Some(SpotStatus::PendingVerification),
            "active" => Some(SpotStatus::Active),
            "inactive" => Some(SpotStatus::Inactive),
            "rejected" => Some(SpotStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    CheckedIn,
    CheckedOut,
    Completed,
    Rejected,
    CancelledByDriver,
    CancelledByHomeowner,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 8] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::CheckedIn,
        BookingStatus::CheckedOut,
        BookingStatus::Completed,
        BookingStatus::Rejected,
        BookingStatus::CancelledByDriver,
        BookingStatus::CancelledByHomeowner,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed
                | BookingStatus::Rejected
                | BookingStatus::CancelledByDriver
                | BookingStatus::CancelledByHomeowner
        )
    }

    /// Statuses that occupy the spot's timeline for conflict purposes: every
    /// non-terminal one, `checked_out` included.
    pub fn blocks_timeline(&self) -> bool {
        !self.is_terminal()
    }

    /// Terminal statuses that hand the reserved range back to the ledger.
    pub fn releases_slot(&self) -> bool {
        matches!(
            self,
            BookingStatus::Rejected
                | BookingStatus::CancelledByDriver
                | BookingStatus::CancelledByHomeowner
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::CheckedIn => "checked_in",
            BookingStatus::CheckedOut => "checked_out",
            BookingStatus::Completed => "completed",
            BookingStatus::Rejected => "rejected",
            BookingStatus::CancelledByDriver => "cancelled_by_driver",
            BookingStatus::CancelledByHomeowner => "cancelled_by_homeowner",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.to_ascii_lowercase();
        Self::ALL.into_iter().find(|st| st.as_str() == s)
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(PaymentStatus::Pending),
            "paid" => Some(PaymentStatus::Paid),
            "refunded" => Some(PaymentStatus::Refunded),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

/// What the gateway reported for a payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
}

impl PaymentOutcome {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "succeeded" | "success" | "paid" => Some(PaymentOutcome::Succeeded),
            "failed" | "failure" => Some(PaymentOutcome::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    Payment,
    Refund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refunded => "refunded",
        }
    }
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Payment => "payment",
            TransactionKind::Refund => "refund",
        }
    }
}

// ── Entities ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub role: Role,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotRecord {
    pub id: Ulid,
    pub owner_id: Ulid,
    /// Hourly price in cents.
    pub hourly_price: Cents,
    pub latitude: f64,
    pub longitude: f64,
    /// Number of vehicles the spot fits. Descriptive only: a spot carries one booking at a time.
    pub vehicle_capacity: u32,
    pub amenities: Vec<String>,
    pub status: SpotStatus,
    pub is_available: bool,
}

impl SpotRecord {
    pub fn accepts_bookings(&self) -> bool {
        self.status == SpotStatus::Active && self.is_available
    }
}

/// Enumerated spot updates. There is no free-form column write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SpotChange {
    Status(SpotStatus),
    Availability(bool),
    HourlyPrice(Cents),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub id: Ulid,
    pub spot_id: Ulid,
    pub span: Span,
    pub is_booked: bool,
}

/// Ledger `update` command; `None` leaves the field unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotUpdate {
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub is_booked: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub spot_id: Ulid,
    pub driver_id: Ulid,
    /// Owner of the spot when the booking was made.
    pub homeowner_id: Ulid,
    pub span: Span,
    pub total_price: Cents,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub gateway_reference: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
    pub driver_check_in_time: Option<Ms>,
    pub driver_check_out_time: Option<Ms>,
    pub homeowner_confirm_time: Option<Ms>,
    pub homeowner_reject_time: Option<Ms>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Ulid,
    pub booking_id: Option<Ulid>,
    pub kind: TransactionKind,
    pub amount: Cents,
    pub status: TransactionStatus,
    pub reference: Option<String>,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub spot_id: Ulid,
    pub driver_id: Ulid,
    pub rating: u8,
    pub comment: Option<String>,
    pub created_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Booking,
    Spot,
    Payment,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Booking => "booking",
            EntityKind::Spot => "spot",
            EntityKind::Payment => "payment",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: Ulid,
    pub user_id: Ulid,
    pub entity_kind: EntityKind,
    pub entity_id: Ulid,
    pub message: String,
    pub is_read: bool,
    pub created_at: Ms,
}

// ── Per-spot state ───────────────────────────────────────────────

/// How a covering slot is split when a booking consumes part of it.
/// The head (if any) keeps the source id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Carve {
    pub source: Ulid,
    pub booked: Ulid,
    pub tail: Option<Ulid>,
}

/// Everything that lives on one spot's timeline. Guarded by one lock.
#[derive(Debug, Clone)]
pub struct SpotState {
    pub spot: SpotRecord,
    /// Sorted by `span.start`.
    pub slots: Vec<AvailabilitySlot>,
    /// Sorted by `span.start`. Never physically removed.
    pub bookings: Vec<Booking>,
    pub transactions: Vec<Transaction>,
    pub reviews: Vec<Review>,
}

impl SpotState {
    pub fn new(spot: SpotRecord) -> Self {
        Self {
            spot,
            slots: Vec::new(),
            bookings: Vec::new(),
            transactions: Vec::new(),
            reviews: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.spot.id
    }

    pub fn insert_slot(&mut self, slot: AvailabilitySlot) {
        let pos = self
            .slots
            .partition_point(|s| s.span.start <= slot.span.start);
        self.slots.insert(pos, slot);
    }

    pub fn remove_slot(&mut self, id: Ulid) -> Option<AvailabilitySlot> {
        let pos = self.slots.iter().position(|s| s.id == id)?;
        Some(self.slots.remove(pos))
    }

    pub fn slot(&self, id: Ulid) -> Option<&AvailabilitySlot> {
        self.slots.iter().find(|s| s.id == id)
    }

    /// Slots whose span overlaps `query`.
    pub fn slots_overlapping(&self, query: &Span) -> impl Iterator<Item = &AvailabilitySlot> {
        let right_bound = self.slots.partition_point(|s| s.span.start < query.end);
        self.slots[..right_bound]
            .iter()
            .filter(move |s| s.span.end > query.start)
    }

    /// First unbooked slot that fully contains `span`.
    pub fn covering_slot(&self, span: &Span) -> Option<&AvailabilitySlot> {
        self.slots_overlapping(span)
            .find(|s| !s.is_booked && s.span.contains_span(span))
    }

    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.span.start <= booking.span.start);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings still holding the timeline that overlap `span`.
    pub fn active_bookings_overlapping(&self, span: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.span.start < span.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.status.blocks_timeline() && b.span.overlaps(span))
    }

    pub fn review_for(&self, booking_id: Ulid) -> Option<&Review> {
        self.reviews.iter().find(|r| r.booking_id == booking_id)
    }

    /// Split the source slot around `span`. Returns ids of slots that no longer exist.
    pub fn carve(&mut self, carve: &Carve, span: Span) -> Vec<Ulid> {
        let Some(source) = self.remove_slot(carve.source) else {
            return Vec::new();
        };
        let mut gone = Vec::new();
        match Span::try_new(source.span.start, span.start) {
            Some(head) => self.insert_slot(AvailabilitySlot { span: head, ..source.clone() }),
            None => gone.push(source.id),
        }
        self.insert_slot(AvailabilitySlot {
            id: carve.booked,
            spot_id: source.spot_id,
            span,
            is_booked: true,
        });
        if let (Some(tail_id), Some(tail)) = (carve.tail, Span::try_new(span.end, source.span.end)) {
            self.insert_slot(AvailabilitySlot {
                id: tail_id,
                spot_id: source.spot_id,
                span: tail,
                is_booked: false,
            });
        }
        gone
    }

    /// Hand a booked range back: unbook the slot matching `span` exactly and
    /// fold in every unbooked slot that overlaps or touches it, so the ledger
    /// keeps unbooked windows disjoint. Returns ids of absorbed slots.
    pub fn release(&mut self, span: Span) -> Vec<Ulid> {
        let Some(pos) = self
            .slots
            .iter()
            .position(|s| s.is_booked && s.span == span)
        else {
            return Vec::new();
        };
        let mut merged = self.slots.remove(pos);
        merged.is_booked = false;

        let mut absorbed = Vec::new();
        while let Some(i) = self.slots.iter().position(|s| {
            !s.is_booked && s.span.start <= merged.span.end && s.span.end >= merged.span.start
        }) {
            let other = self.slots.remove(i);
            merged.span.start = merged.span.start.min(other.span.start);
            merged.span.end = merged.span.end.max(other.span.end);
            absorbed.push(other.id);
        }
        self.insert_slot(merged);
        absorbed
    }
}

/// WAL record format. Flat, no nesting beyond value types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        user: User,
    },
    SpotListed {
        spot: SpotRecord,
    },
    SpotChanged {
        id: Ulid,
        changes: Vec<SpotChange>,
    },
    SpotDelisted {
        id: Ulid,
    },
    SlotDeclared {
        slot: AvailabilitySlot,
    },
    SlotChanged {
        id: Ulid,
        spot_id: Ulid,
        span: Span,
        is_booked: bool,
    },
    SlotRemoved {
        id: Ulid,
        spot_id: Ulid,
    },
    /// `carve` is `None` for snapshot records written by compaction: the
    /// ledger slots are restored separately.
    BookingCreated {
        booking: Booking,
        carve: Option<Carve>,
    },
    BookingTransitioned {
        id: Ulid,
        spot_id: Ulid,
        from: BookingStatus,
        to: BookingStatus,
        at: Ms,
    },
    PaymentStatusChanged {
        booking_id: Ulid,
        spot_id: Ulid,
        status: PaymentStatus,
        reference: Option<String>,
        at: Ms,
    },
    TransactionRecorded {
        spot_id: Ulid,
        tx: Transaction,
    },
    TransactionSettled {
        id: Ulid,
        spot_id: Ulid,
        status: TransactionStatus,
    },
    ReviewPosted {
        review: Review,
    },
}

/// Spot rating aggregate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingSummary {
    pub count: usize,
    pub average: Option<f64>,
}
