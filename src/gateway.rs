//! Payment gateway capability. The engine only needs an intent reference up
//! front and a success/failure answer later; everything else is the gateway's.

use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::{Cents, PaymentOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub reference: String,
    pub amount: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The gateway has no record of the reference.
    UnknownReference(String),
    /// The payment has not settled yet.
    Pending(String),
    Unavailable(String),
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::UnknownReference(r) => write!(f, "unknown payment reference: {r}"),
            GatewayError::Pending(r) => write!(f, "payment {r} has not settled"),
            GatewayError::Unavailable(e) => write!(f, "gateway unavailable: {e}"),
        }
    }
}

impl std::error::Error for GatewayError {}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, booking_id: Ulid, amount: Cents) -> Result<PaymentIntent, GatewayError>;

    async fn confirm_outcome(&self, reference: &str) -> Result<PaymentOutcome, GatewayError>;
}

/// In-process gateway: intents settle only when told to. Used when no external
/// gateway is wired in, and by tests.
#[derive(Default)]
pub struct SandboxGateway {
    intents: DashMap<String, (Cents, Option<PaymentOutcome>)>,
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settle an intent as the gateway's back office would.
    pub fn settle(&self, reference: &str, outcome: PaymentOutcome) -> Result<(), GatewayError> {
        let mut entry = self
            .intents
            .get_mut(reference)
            .ok_or_else(|| GatewayError::UnknownReference(reference.to_string()))?;
        entry.1 = Some(outcome);
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn create_intent(&self, _booking_id: Ulid, amount: Cents) -> Result<PaymentIntent, GatewayError> {
        let reference = format!("pi_{}", Ulid::new().to_string().to_lowercase());
        self.intents.insert(reference.clone(), (amount, None));
        Ok(PaymentIntent { reference, amount })
    }

    async fn confirm_outcome(&self, reference: &str) -> Result<PaymentOutcome, GatewayError> {
        let entry = self
            .intents
            .get(reference)
            .ok_or_else(|| GatewayError::UnknownReference(reference.to_string()))?;
        entry.1.ok_or_else(|| GatewayError::Pending(reference.to_string()))
    }
}
