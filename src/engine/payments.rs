//! Payment/booking reconciliation. Payment state is informational: nothing in
//! here moves a booking through its lifecycle.

use std::future::Future;

use tracing::{debug, warn};
use ulid::Ulid;

use crate::gateway::{GatewayError, PaymentIntent};
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::now_ms;
use super::lifecycle::Actor;
use super::{Engine, EngineError};

/// What a reported outcome did to the booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Payment status changed.
    Applied,
    /// Same outcome already recorded for this reference; nothing changed.
    Replayed,
    /// A late failure for a booking that is already paid or refunded. Logged
    /// on the transaction only.
    Superseded,
}

impl Reconciliation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reconciliation::Applied => "applied",
            Reconciliation::Replayed => "replayed",
            Reconciliation::Superseded => "superseded",
        }
    }
}

/// Manual payment-status edges.
fn manual_edge_allowed(from: PaymentStatus, to: PaymentStatus) -> bool {
    use PaymentStatus::*;
    matches!(
        (from, to),
        (Pending, Paid) | (Pending, Failed) | (Failed, Paid) | (Failed, Pending) | (Paid, Refunded)
    )
}

fn validate_reference(reference: &str) -> Result<(), EngineError> {
    if reference.is_empty() {
        return Err(EngineError::Validation("payment reference is empty"));
    }
    if reference.len() > MAX_REFERENCE_LEN {
        return Err(EngineError::LimitExceeded("payment reference too long"));
    }
    Ok(())
}

/// Latest payment transaction for `reference` on the booking.
fn payment_tx<'a>(ss: &'a SpotState, booking_id: Ulid, reference: &str) -> Option<&'a Transaction> {
    ss.transactions.iter().rev().find(|t| {
        t.kind == TransactionKind::Payment
            && t.booking_id == Some(booking_id)
            && t.reference.as_deref() == Some(reference)
    })
}

impl Engine {
    async fn call_gateway<T>(
        &self,
        call: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, EngineError> {
        match tokio::time::timeout(self.gateway_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(GatewayError::UnknownReference(_))) => {
                Err(EngineError::Validation("unknown payment reference"))
            }
            Ok(Err(GatewayError::Pending(_))) => {
                Err(EngineError::InvalidState("payment has not settled yet"))
            }
            Ok(Err(e)) => {
                warn!("payment gateway error: {e}");
                Err(EngineError::Gateway(e.to_string()))
            }
            Err(_) => {
                warn!("payment gateway timed out after {:?}", self.gateway_timeout);
                Err(EngineError::Gateway("timed out".into()))
            }
        }
    }

    /// The booking, checked to be payable by `caller`: its driver or an admin.
    async fn payable_booking(&self, caller: &User, booking_id: Ulid) -> Result<Booking, EngineError> {
        let spot_id = self
            .store
            .spot_for_entity(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let shard = self.spot_shard(&spot_id)?;
        let guard = shard.read().await;
        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if let Actor::Homeowner(_) = Actor::for_booking(caller, booking)? {
            return Err(EngineError::Forbidden("only the driver pays for a booking"));
        }
        Ok(booking.clone())
    }

    /// Open a payment intent with the gateway and log a pending transaction
    /// for it. The gateway round trip happens outside the spot lock.
    pub async fn initiate_payment(
        &self,
        caller_id: Ulid,
        booking_id: Ulid,
    ) -> Result<PaymentIntent, EngineError> {
        let caller = self.caller(&caller_id)?;
        let booking = self.payable_booking(&caller, booking_id).await?;
        if booking.status.releases_slot() {
            return Err(EngineError::InvalidState("booking was cancelled or rejected"));
        }
        if !matches!(booking.payment_status, PaymentStatus::Pending | PaymentStatus::Failed) {
            return Err(EngineError::InvalidState("booking is already paid"));
        }

        let intent = self
            .call_gateway(self.gateway.create_intent(booking_id, booking.total_price))
            .await?;
        validate_reference(&intent.reference)?;

        let mut guard = self.resolve_entity_write(&booking_id).await?;
        let tx = Transaction {
            id: Ulid::new(),
            booking_id: Some(booking_id),
            kind: TransactionKind::Payment,
            amount: intent.amount,
            status: TransactionStatus::Pending,
            reference: Some(intent.reference.clone()),
            created_at: now_ms(),
        };
        let spot_id = guard.id();
        self.persist_and_apply(&mut guard, &Event::TransactionRecorded { spot_id, tx })
            .await?;
        debug!("payment intent {} for booking {booking_id}", intent.reference);
        Ok(intent)
    }

    /// Gateway webhook path. Admin only.
    pub async fn record_payment_outcome(
        &self,
        caller_id: Ulid,
        booking_id: Ulid,
        reference: &str,
        outcome: PaymentOutcome,
    ) -> Result<Reconciliation, EngineError> {
        let caller = self.caller(&caller_id)?;
        if caller.role != Role::Admin {
            return Err(EngineError::Forbidden("only an admin reports gateway outcomes"));
        }
        self.reconcile(booking_id, reference, outcome).await
    }

    /// Client callback path: ask the gateway how the payment went, then
    /// reconcile exactly as the webhook would.
    pub async fn confirm_payment(
        &self,
        caller_id: Ulid,
        booking_id: Ulid,
        reference: &str,
    ) -> Result<Reconciliation, EngineError> {
        let caller = self.caller(&caller_id)?;
        validate_reference(reference)?;
        self.payable_booking(&caller, booking_id).await?;
        let outcome = self
            .call_gateway(self.gateway.confirm_outcome(reference))
            .await?;
        self.reconcile(booking_id, reference, outcome).await
    }

    /// Idempotent on `(booking, reference, outcome)`: a repeat changes nothing
    /// and notifies nobody.
    pub(super) async fn reconcile(
        &self,
        booking_id: Ulid,
        reference: &str,
        outcome: PaymentOutcome,
    ) -> Result<Reconciliation, EngineError> {
        validate_reference(reference)?;
        let mut guard = self.resolve_entity_write(&booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        let spot_id = guard.id();
        let existing = payment_tx(&guard, booking_id, reference).cloned();
        let settled_status = match outcome {
            PaymentOutcome::Succeeded => TransactionStatus::Completed,
            PaymentOutcome::Failed => TransactionStatus::Failed,
        };
        let already_paid_here = booking.gateway_reference.as_deref() == Some(reference);

        let verdict = match (outcome, booking.payment_status) {
            (PaymentOutcome::Succeeded, PaymentStatus::Paid | PaymentStatus::Refunded)
                if already_paid_here =>
            {
                Reconciliation::Replayed
            }
            (PaymentOutcome::Succeeded, PaymentStatus::Paid) => {
                return Err(EngineError::InvalidState("booking already paid under another reference"));
            }
            (PaymentOutcome::Succeeded, PaymentStatus::Refunded) => {
                return Err(EngineError::InvalidState("booking payment was refunded"));
            }
            (PaymentOutcome::Failed, PaymentStatus::Paid | PaymentStatus::Refunded) => {
                Reconciliation::Superseded
            }
            _ if existing.as_ref().is_some_and(|t| t.status == settled_status) => {
                Reconciliation::Replayed
            }
            _ => Reconciliation::Applied,
        };

        let now = now_ms();
        if verdict == Reconciliation::Applied {
            let status = match outcome {
                PaymentOutcome::Succeeded => PaymentStatus::Paid,
                PaymentOutcome::Failed => PaymentStatus::Failed,
            };
            let reference = (outcome == PaymentOutcome::Succeeded).then(|| reference.to_string());
            let event = Event::PaymentStatusChanged { booking_id, spot_id, status, reference, at: now };
            self.persist_and_apply(&mut guard, &event).await?;
        }

        // Bring the transaction in line, including after a crash between the
        // two appends. A settled attempt is never rewritten: a retry under the
        // same reference that lands differently gets its own record.
        let recorded = || Event::TransactionRecorded {
            spot_id,
            tx: Transaction {
                id: Ulid::new(),
                booking_id: Some(booking_id),
                kind: TransactionKind::Payment,
                amount: booking.total_price,
                status: settled_status,
                reference: Some(reference.to_string()),
                created_at: now,
            },
        };
        let tx_event = match &existing {
            Some(tx) if tx.status == settled_status => None,
            Some(tx) if tx.status == TransactionStatus::Pending => Some(Event::TransactionSettled {
                id: tx.id,
                spot_id,
                status: settled_status,
            }),
            Some(_) if verdict == Reconciliation::Superseded => None,
            Some(_) | None => Some(recorded()),
        };
        if let Some(event) = tx_event {
            self.persist_and_apply(&mut guard, &event).await?;
        }
        drop(guard);

        metrics::counter!(observability::PAYMENT_OUTCOMES_TOTAL, "result" => verdict.as_str())
            .increment(1);
        debug!("payment {reference} for booking {booking_id}: {}", verdict.as_str());
        if verdict == Reconciliation::Applied {
            let message = match outcome {
                PaymentOutcome::Succeeded => "payment received",
                PaymentOutcome::Failed => "payment failed",
            };
            self.notify_user(booking.driver_id, EntityKind::Payment, booking_id, message.into());
            self.notify_user(booking.homeowner_id, EntityKind::Payment, booking_id, message.into());
        }
        Ok(verdict)
    }

    /// Manual payment status change by the booking's homeowner or an admin.
    /// A refund settles the completed payment as refunded and logs a refund.
    pub async fn set_payment_status(
        &self,
        caller_id: Ulid,
        booking_id: Ulid,
        to: PaymentStatus,
    ) -> Result<Booking, EngineError> {
        let caller = self.caller(&caller_id)?;
        let mut guard = self.resolve_entity_write(&booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        if let Actor::Driver(_) = Actor::for_booking(&caller, &booking)? {
            return Err(EngineError::Forbidden("only the homeowner or an admin sets payment status"));
        }
        if !manual_edge_allowed(booking.payment_status, to) {
            return Err(EngineError::InvalidState("payment status change not allowed"));
        }

        let spot_id = guard.id();
        let now = now_ms();
        let event = Event::PaymentStatusChanged { booking_id, spot_id, status: to, reference: None, at: now };
        self.persist_and_apply(&mut guard, &event).await?;

        match to {
            PaymentStatus::Paid => {
                let tx = Transaction {
                    id: Ulid::new(),
                    booking_id: Some(booking_id),
                    kind: TransactionKind::Payment,
                    amount: booking.total_price,
                    status: TransactionStatus::Completed,
                    reference: None,
                    created_at: now,
                };
                self.persist_and_apply(&mut guard, &Event::TransactionRecorded { spot_id, tx })
                    .await?;
            }
            PaymentStatus::Refunded => {
                let paid = guard
                    .transactions
                    .iter()
                    .find(|t| {
                        t.booking_id == Some(booking_id)
                            && t.kind == TransactionKind::Payment
                            && t.status == TransactionStatus::Completed
                    })
                    .map(|t| t.id);
                if let Some(id) = paid {
                    let event = Event::TransactionSettled { id, spot_id, status: TransactionStatus::Refunded };
                    self.persist_and_apply(&mut guard, &event).await?;
                }
                let refund = Transaction {
                    id: Ulid::new(),
                    booking_id: Some(booking_id),
                    kind: TransactionKind::Refund,
                    amount: booking.total_price,
                    status: TransactionStatus::Completed,
                    reference: booking.gateway_reference.clone(),
                    created_at: now,
                };
                self.persist_and_apply(&mut guard, &Event::TransactionRecorded { spot_id, tx: refund })
                    .await?;
            }
            PaymentStatus::Pending | PaymentStatus::Failed => {}
        }

        let updated = guard
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        drop(guard);
        self.notify_user(
            updated.driver_id,
            EntityKind::Payment,
            booking_id,
            format!("payment is now {}", to.as_str()),
        );
        Ok(updated)
    }
}
