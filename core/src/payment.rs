//! Payment collaborator.
//!
//! Payment is handled by an external service. Checkout asks it for a redirect
//! URL; the outcome arrives later as a [`PaymentConfirmation`]. No gateway call
//! ever happens inside an inventory transaction.

use crate::types::{Money, OrderId};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Payment gateway result
pub type GatewayResult<T> = std::result::Result<T, PaymentGatewayError>;

/// Errors reported by a payment gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentGatewayError {
    /// The gateway did not answer in time.
    #[error("Payment gateway timeout")]
    Timeout,

    /// The gateway refused to open a payment session.
    #[error("Payment rejected: {reason}")]
    Rejected {
        /// Reason given by the gateway
        reason: String,
    },

    /// Anything else.
    #[error("Payment gateway error: {0}")]
    Other(String),
}

/// Payment gateway trait
///
/// Abstraction over hosted payment pages (Stripe Checkout and the like).
pub trait PaymentGateway: Send + Sync {
    /// Open a payment session for an order and return the URL the buyer is
    /// sent to.
    ///
    /// # Errors
    ///
    /// Returns error if the gateway cannot open a session
    fn initiate(
        &self,
        order_id: OrderId,
        amount: Money,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<String>> + Send + '_>>;
}

/// How a payment ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// Money captured.
    Succeeded,
    /// Payment declined or abandoned.
    Failed {
        /// Reason reported by the gateway
        reason: String,
    },
}

/// Asynchronous confirmation delivered by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    /// Order the payment was for
    pub order_id: OrderId,
    /// Gateway payment reference, recorded as the order's `payment_id`
    pub reference: String,
    /// Outcome
    pub outcome: PaymentOutcome,
}

impl PaymentConfirmation {
    /// A successful confirmation.
    #[must_use]
    pub fn succeeded(order_id: OrderId, reference: impl Into<String>) -> Self {
        Self {
            order_id,
            reference: reference.into(),
            outcome: PaymentOutcome::Succeeded,
        }
    }

    /// A failed confirmation.
    #[must_use]
    pub fn failed(order_id: OrderId, reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            order_id,
            reference: reference.into(),
            outcome: PaymentOutcome::Failed {
                reason: reason.into(),
            },
        }
    }

    /// Whether the payment succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.outcome, PaymentOutcome::Succeeded)
    }
}
