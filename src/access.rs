use crate::types::PaymentStatus;
use serde::Serialize;

/// What a viewer sees in place of the player.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessDecision {
    Player,
    Login,
    Payment,
    /// Payment prompt showing that a submitted request awaits review.
    PaymentPending,
}

impl AccessDecision {
    pub fn is_payment_prompt(&self) -> bool {
        matches!(self, AccessDecision::Payment | AccessDecision::PaymentPending)
    }
}

pub fn decide(
    authenticated: bool,
    requires_payment: bool,
    payment: Option<PaymentStatus>,
) -> AccessDecision {
    if !authenticated {
        return AccessDecision::Login;
    }
    if !requires_payment {
        return AccessDecision::Player;
    }
    match payment {
        Some(PaymentStatus::Approved) => AccessDecision::Player,
        Some(PaymentStatus::Pending) => AccessDecision::PaymentPending,
        Some(PaymentStatus::Rejected) | None => AccessDecision::Payment,
    }
}
