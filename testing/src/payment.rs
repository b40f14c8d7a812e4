//! Mock payment gateway.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use boxoffice_core::payment::{GatewayResult, PaymentGateway, PaymentGatewayError};
use boxoffice_core::types::{Money, OrderId};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// Payment gateway that opens fake sessions and remembers them.
///
/// Failures can be queued with [`MockPaymentGateway::fail_next`].
#[derive(Clone, Debug, Default)]
pub struct MockPaymentGateway {
    sessions: Arc<Mutex<Vec<(OrderId, Money)>>>,
    failures: Arc<Mutex<VecDeque<PaymentGatewayError>>>,
}

impl MockPaymentGateway {
    /// Creates a new mock payment gateway
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared() -> Arc<dyn PaymentGateway> {
        Arc::new(Self::new())
    }

    /// Make the next `initiate` call fail.
    pub fn fail_next(&self, error: PaymentGatewayError) {
        self.failures.lock().unwrap().push_back(error);
    }

    /// Every successfully opened session, in call order.
    #[must_use]
    pub fn sessions(&self) -> Vec<(OrderId, Money)> {
        self.sessions.lock().unwrap().clone()
    }

    /// Redirect URL handed out for `order_id`.
    #[must_use]
    pub fn redirect_url(order_id: OrderId) -> String {
        format!("https://pay.example.test/checkout/{order_id}")
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn initiate(
        &self,
        order_id: OrderId,
        amount: Money,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<String>> + Send + '_>> {
        Box::pin(async move {
            let failure = self.failures.lock().unwrap().pop_front();
            if let Some(error) = failure {
                tracing::info!(order_id = %order_id, %error, "Mock payment session refused");
                return Err(error);
            }

            self.sessions.lock().unwrap().push((order_id, amount));
            tracing::info!(
                order_id = %order_id,
                amount = amount.minor(),
                "Mock payment session opened"
            );
            Ok(Self::redirect_url(order_id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_payment_session() {
        let gateway = MockPaymentGateway::new();
        let order_id = OrderId::new();

        let url = gateway.initiate(order_id, Money::from_minor(7500)).await.unwrap();

        assert!(url.ends_with(&order_id.to_string()));
        assert_eq!(gateway.sessions(), vec![(order_id, Money::from_minor(7500))]);
    }

    #[tokio::test]
    async fn test_queued_failure() {
        let gateway = MockPaymentGateway::new();
        gateway.fail_next(PaymentGatewayError::Timeout);

        assert_eq!(
            gateway.initiate(OrderId::new(), Money::ZERO).await,
            Err(PaymentGatewayError::Timeout)
        );
        assert!(gateway.initiate(OrderId::new(), Money::ZERO).await.is_ok());
        assert_eq!(gateway.sessions().len(), 1);
    }
}
