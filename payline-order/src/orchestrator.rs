use payline_core::{ChargeRequest, ChargeResponse, ChargeStatus, EventSink, GatewayError, PaymentGateway, RetryPolicy};
use payline_shared::models::events::{DomainEvent, PAYMENT_FAILED, PAYMENT_SUCCEEDED};
use payline_shared::round_money;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{Order, OrderError, OrderState};
use crate::payment::{Payment, PaymentState, Transaction, KIND_PAY};
use crate::repository::{OrderRepository, RepositoryError};

/// Field of the payment request holding the card source token
pub const SOURCE_TOKEN_FIELD: &str = "token";

/// Gateway name recorded on refunds settled outside the gateway
pub const MANUAL_GATEWAY: &str = "manual";

const DEFAULT_DESCRIPTION: &str = "Payline charge";

/// Drives a payment through the gateway and records every call on the order
pub struct PaymentOrchestrator {
    gateway: Arc<dyn PaymentGateway>,
    events: Arc<dyn EventSink>,
    repository: Arc<dyn OrderRepository>,
    retry: RetryPolicy,
    description: String,
}

impl PaymentOrchestrator {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        events: Arc<dyn EventSink>,
        repository: Arc<dyn OrderRepository>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            gateway,
            events,
            repository,
            retry,
            description: DEFAULT_DESCRIPTION.to_string(),
        }
    }

    /// Prefix of the charge description sent to the gateway
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Charge the order total.
    ///
    /// Gateway outcomes are reflected on the returned payment; only
    /// validation and storage problems are reported as errors.
    pub async fn create_payment(
        &self,
        order: &mut Order,
        mut data: Map<String, Value>,
    ) -> Result<Payment, OrchestratorError> {
        if !order.state.accepts_payment() {
            return Err(OrchestratorError::NotPayable(order.state));
        }
        if let Some(open) = order.payments().iter().find(|p| !p.is_refund() && p.state().is_open()) {
            return Err(OrchestratorError::PaymentInProgress(open.id));
        }
        let source = match data.remove(SOURCE_TOKEN_FIELD) {
            Some(Value::String(token)) if !token.is_empty() => token,
            _ => {
                return Err(OrchestratorError::Validation(
                    "a card source token is required".to_string(),
                ))
            }
        };

        order.compute_totals(true);
        let amount = order.total().unwrap_or_default();
        if amount <= Decimal::ZERO {
            return Err(OrchestratorError::Validation(format!("order total {} must be positive", amount)));
        }
        let mut payment = Payment::new(order.id, self.gateway.name(), amount)?;
        payment.data = data;
        let payment_id = payment.id;
        order.add_payment(payment)?;
        order.update_state(OrderState::InProcess);

        let description = match order.unique_id() {
            Some(unique_id) => format!("{} {}", self.description, unique_id),
            None => self.description.clone(),
        };
        let request = ChargeRequest::new(amount, &order.currency_code, source, description)
            .with_idempotency_key(payment_id.simple().to_string());

        tracing::info!(
            "Charging {} {} for order {} via {}",
            request.amount,
            request.currency,
            order.id,
            self.gateway.name()
        );

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let transaction = Transaction::new(payment_id, KIND_PAY, request.to_request_data())?;
            let transaction_id = transaction.id;
            payment_mut(order, payment_id)?.add_transaction(transaction)?;

            // Checkpoint so the attempt is on record even if the process dies mid-call
            self.repository.save(order).await?;

            match self.gateway.charge(&request).await {
                Ok(response) => {
                    self.apply_response(order, payment_id, transaction_id, response)?;
                    break;
                }
                Err(err) => {
                    let transaction = transaction_mut(order, payment_id, transaction_id)?;
                    transaction.fail(err.code().map(str::to_string), err.message())?;

                    if self.retry.should_retry(&err, attempt) {
                        let delay = self.retry.backoff.delay_for_attempt(attempt);
                        tracing::warn!(
                            "Gateway attempt {}/{} for payment {} failed: {}; retrying in {:?}",
                            attempt,
                            self.retry.max_attempts,
                            payment_id,
                            err,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    self.apply_failure(order, payment_id, &err, attempt)?;
                    break;
                }
            }
        }

        self.repository.save(order).await?;

        let payment = order
            .payment(payment_id)
            .cloned()
            .ok_or(OrderError::PaymentNotFound(payment_id))?;
        self.notify(&payment).await;
        Ok(payment)
    }

    /// Settle a charge the gateway left PENDING or PENDING_USER.
    ///
    /// SUCCESS marks the order paid. ERROR and CANCEL leave it INCOMPLETE so
    /// it can be paid again.
    pub async fn settle_payment(
        &self,
        order: &mut Order,
        payment_id: Uuid,
        next: PaymentState,
    ) -> Result<Payment, OrchestratorError> {
        if next.is_open() {
            return Err(OrchestratorError::Validation(format!(
                "{} does not settle a payment",
                next.as_str()
            )));
        }

        let payment = payment_mut(order, payment_id)?;
        if payment.is_refund() || !payment.state().is_open() {
            return Err(OrchestratorError::NotPending(payment.state()));
        }
        payment.transition_to(next)?;

        if order.state.accepts_payment() {
            let state = match next {
                PaymentState::Success => OrderState::Paid,
                _ => OrderState::Incomplete,
            };
            order.update_state(state);
        }
        self.repository.save(order).await?;

        let payment = order
            .payment(payment_id)
            .cloned()
            .ok_or(OrderError::PaymentNotFound(payment_id))?;
        tracing::info!(
            "Payment {} settled as {}, order {} now {}",
            payment_id,
            next.as_str(),
            order.id,
            order.state.as_str()
        );
        self.notify(&payment).await;
        Ok(payment)
    }

    /// Record a refund settled outside the gateway.
    pub async fn record_refund(&self, order: &mut Order, amount: Decimal) -> Result<Payment, OrchestratorError> {
        if !matches!(
            order.state,
            OrderState::Paid | OrderState::Completed | OrderState::PartiallyRefunded
        ) {
            return Err(OrchestratorError::NotRefundable(order.state));
        }
        if amount <= Decimal::ZERO {
            return Err(OrchestratorError::Validation("refund amount must be positive".to_string()));
        }

        order.compute_totals(true);
        let total = order.total().unwrap_or_default();
        let remaining = total - order.total_refunded().unwrap_or_default();
        let amount = round_money(amount);
        if amount > remaining {
            return Err(OrchestratorError::Validation(format!(
                "refund of {} exceeds the remaining {}",
                amount, remaining
            )));
        }

        let mut refund = Payment::refund(order.id, MANUAL_GATEWAY, amount)?;
        refund.transition_to(PaymentState::Success)?;
        order.add_payment(refund.clone())?;
        order.compute_totals(false);

        let next = if order.total_refunded().unwrap_or_default() >= total {
            OrderState::Refunded
        } else {
            OrderState::PartiallyRefunded
        };
        order.update_state(next);
        self.repository.save(order).await?;

        tracing::info!("Refunded {} on order {}, now {}", amount, order.id, next.as_str());
        Ok(refund)
    }

    fn apply_response(
        &self,
        order: &mut Order,
        payment_id: Uuid,
        transaction_id: Uuid,
        response: ChargeResponse,
    ) -> Result<(), OrderError> {
        let transaction = transaction_mut(order, payment_id, transaction_id)?;
        transaction.succeed(response.fields.clone())?;
        if response.status == ChargeStatus::Failed {
            transaction.error_code = response.failure_code.clone();
            transaction.error_message = response.failure_message.clone();
        }

        let payment = payment_mut(order, payment_id)?;
        payment.provider_transaction_reference = Some(response.id.clone());

        match response.status {
            ChargeStatus::Succeeded => {
                payment.transition_to(PaymentState::Success)?;
                let is_refund = payment.is_refund();
                if !is_refund && order.state.accepts_payment() {
                    order.update_state(OrderState::Paid);
                }
                tracing::info!("Payment {} succeeded ({})", payment_id, response.id);
            }
            ChargeStatus::Pending => {
                if let Some(url) = response.redirect_url {
                    payment.redirect_url = Some(url);
                    payment.transition_to(PaymentState::PendingUser)?;
                }
                tracing::info!("Payment {} awaiting confirmation ({})", payment_id, response.id);
            }
            ChargeStatus::Failed => {
                payment.transition_to(PaymentState::Error)?;
                order.update_state(OrderState::Incomplete);
                tracing::error!(
                    "Payment {} declined: {}",
                    payment_id,
                    response.failure_message.as_deref().unwrap_or("no reason given")
                );
            }
        }
        Ok(())
    }

    fn apply_failure(
        &self,
        order: &mut Order,
        payment_id: Uuid,
        err: &GatewayError,
        attempts: u32,
    ) -> Result<(), OrderError> {
        payment_mut(order, payment_id)?.transition_to(PaymentState::Error)?;
        order.update_state(OrderState::Incomplete);
        tracing::error!("Payment {} failed after {} attempt(s): {}", payment_id, attempts, err);
        Ok(())
    }

    // Delivery is best effort; the payment outcome is already stored.
    async fn notify(&self, payment: &Payment) {
        let name = match payment.state() {
            PaymentState::Success => PAYMENT_SUCCEEDED,
            PaymentState::Error => PAYMENT_FAILED,
            _ => return,
        };

        let event = match DomainEvent::new(name, payment) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!("Failed to encode {} for payment {}: {}", name, payment.id, e);
                return;
            }
        };

        if let Err(e) = self.events.publish(event).await {
            tracing::warn!("Failed to publish {} for payment {}: {}", name, payment.id, e);
        }
    }
}

fn payment_mut(order: &mut Order, payment_id: Uuid) -> Result<&mut Payment, OrderError> {
    order.payment_mut(payment_id).ok_or(OrderError::PaymentNotFound(payment_id))
}

fn transaction_mut(order: &mut Order, payment_id: Uuid, transaction_id: Uuid) -> Result<&mut Transaction, OrderError> {
    payment_mut(order, payment_id)?
        .transaction_mut(transaction_id)
        .ok_or_else(|| OrderError::Consistency(format!("transaction {} missing from payment {}", transaction_id, payment_id)))
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Order cannot be paid in state {}", .0.as_str())]
    NotPayable(OrderState),

    #[error("Order cannot be refunded in state {}", .0.as_str())]
    NotRefundable(OrderState),

    #[error("Payment {0} is still awaiting settlement")]
    PaymentInProgress(Uuid),

    #[error("Payment in state {} cannot be settled", .0.as_str())]
    NotPending(PaymentState),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Item, Tax};
    use crate::payment::TransactionState;
    use crate::repository::InMemoryOrderRepository;
    use async_trait::async_trait;
    use payline_catalog::TaxRateSnapshot;
    use payline_core::{BackoffStrategy, CoreError, CoreResult, MockGateway};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<DomainEvent>>,
    }

    impl RecordingSink {
        fn names(&self) -> Vec<String> {
            self.events.lock().unwrap().iter().map(|e| e.name.clone()).collect()
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn publish(&self, event: DomainEvent) -> CoreResult<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    struct UnreachableSink;

    #[async_trait]
    impl EventSink for UnreachableSink {
        async fn publish(&self, _event: DomainEvent) -> CoreResult<()> {
            Err(CoreError::EventDelivery("broker unreachable".to_string()))
        }
    }

    struct Fixture {
        gateway: Arc<MockGateway>,
        sink: Arc<RecordingSink>,
        repository: Arc<InMemoryOrderRepository>,
        orchestrator: PaymentOrchestrator,
    }

    fn fixture(outcomes: Vec<Result<ChargeResponse, GatewayError>>, max_attempts: u32) -> Fixture {
        let gateway = Arc::new(MockGateway::with_outcomes(outcomes));
        let sink = Arc::new(RecordingSink::default());
        let repository = Arc::new(InMemoryOrderRepository::new());
        let retry = RetryPolicy::new(max_attempts).with_backoff(BackoffStrategy::None);
        let orchestrator = PaymentOrchestrator::new(gateway.clone(), sink.clone(), repository.clone(), retry);
        Fixture {
            gateway,
            sink,
            repository,
            orchestrator,
        }
    }

    async fn saved_order(repository: &InMemoryOrderRepository) -> Order {
        let mut order = Order::new("CAD").unwrap();
        order.add_item(Item::new(order.id, "SKU-1", 2, Decimal::new(10005, 3)).unwrap()).unwrap();
        order.add_item(Item::new(order.id, "SKU-2", 1, Decimal::new(500, 2)).unwrap()).unwrap();
        order
            .add_tax(Tax::from_snapshot(
                order.id,
                TaxRateSnapshot {
                    tax_name: "GST".to_string(),
                    tax_number: "GST-1".to_string(),
                    rate: Decimal::new(15, 2),
                },
            ))
            .unwrap();
        repository.save(&mut order).await.unwrap();
        order
    }

    fn token(value: &str) -> Map<String, Value> {
        json!({ "token": value }).as_object().cloned().unwrap()
    }

    fn redirect() -> ChargeResponse {
        let mut pending = ChargeResponse::with_status("ch_3ds", ChargeStatus::Pending);
        pending.redirect_url = Some("https://bank.example/3ds".to_string());
        pending
    }

    #[tokio::test]
    async fn test_successful_payment() {
        let f = fixture(vec![], 3);
        let mut order = saved_order(&f.repository).await;

        let payment = f.orchestrator.create_payment(&mut order, token("tok_visa")).await.unwrap();

        assert_eq!(payment.state(), PaymentState::Success);
        assert_eq!(payment.amount(), Decimal::new(2876, 2));
        assert!(payment.provider_transaction_reference.is_some());
        assert_eq!(payment.transactions().len(), 1);

        let tx = &payment.transactions()[0];
        assert_eq!(tx.kind(), KIND_PAY);
        assert_eq!(tx.state(), TransactionState::Success);
        assert_eq!(tx.request_data()["amount"], json!("28.76"));
        assert_eq!(tx.request_data()["currency"], json!("cad"));

        assert_eq!(order.state, OrderState::Paid);
        assert_eq!(f.sink.names(), vec![PAYMENT_SUCCEEDED.to_string()]);

        let stored = f.repository.find(order.id).await.unwrap().unwrap();
        assert_eq!(stored.state, OrderState::Paid);
        assert_eq!(stored.version(), order.version());

        let requests = f.gateway.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].source.expose(), "tok_visa");
    }

    #[tokio::test]
    async fn test_retryable_errors_then_success() {
        let f = fixture(
            vec![Err(GatewayError::retryable("timeout")), Err(GatewayError::retryable("503"))],
            3,
        );
        let mut order = saved_order(&f.repository).await;

        let payment = f.orchestrator.create_payment(&mut order, token("tok_visa")).await.unwrap();

        let states: Vec<TransactionState> = payment.transactions().iter().map(|t| t.state()).collect();
        assert_eq!(
            states,
            vec![TransactionState::Error, TransactionState::Error, TransactionState::Success]
        );
        assert_eq!(payment.transactions()[0].error_message.as_deref(), Some("timeout"));
        assert_eq!(payment.state(), PaymentState::Success);
        assert_eq!(f.gateway.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let f = fixture(
            vec![Err(GatewayError::retryable("down")), Err(GatewayError::retryable("down"))],
            2,
        );
        let mut order = saved_order(&f.repository).await;

        let payment = f.orchestrator.create_payment(&mut order, token("tok_visa")).await.unwrap();

        assert_eq!(payment.transactions().len(), 2);
        assert_eq!(payment.state(), PaymentState::Error);
        assert_eq!(order.state, OrderState::Incomplete);
        assert_eq!(f.sink.names(), vec![PAYMENT_FAILED.to_string()]);
    }

    #[tokio::test]
    async fn test_terminal_error_is_not_retried() {
        let f = fixture(
            vec![Err(GatewayError::terminal(Some("card_declined".to_string()), "declined"))],
            3,
        );
        let mut order = saved_order(&f.repository).await;

        let payment = f.orchestrator.create_payment(&mut order, token("tok_bad")).await.unwrap();

        assert_eq!(payment.transactions().len(), 1);
        assert_eq!(payment.transactions()[0].error_code.as_deref(), Some("card_declined"));
        assert_eq!(payment.state(), PaymentState::Error);
        assert_eq!(f.gateway.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_declined_response() {
        let mut declined = ChargeResponse::with_status("ch_1", ChargeStatus::Failed);
        declined.failure_code = Some("insufficient_funds".to_string());
        let f = fixture(vec![Ok(declined)], 3);
        let mut order = saved_order(&f.repository).await;

        let payment = f.orchestrator.create_payment(&mut order, token("tok_visa")).await.unwrap();

        assert_eq!(payment.transactions()[0].state(), TransactionState::Success);
        assert_eq!(payment.transactions()[0].error_code.as_deref(), Some("insufficient_funds"));
        assert_eq!(payment.state(), PaymentState::Error);
        assert_eq!(order.state, OrderState::Incomplete);
    }

    #[tokio::test]
    async fn test_pending_with_redirect() {
        let f = fixture(vec![Ok(redirect())], 3);
        let mut order = saved_order(&f.repository).await;

        let payment = f.orchestrator.create_payment(&mut order, token("tok_visa")).await.unwrap();

        assert_eq!(payment.state(), PaymentState::PendingUser);
        assert_eq!(payment.redirect_url.as_deref(), Some("https://bank.example/3ds"));
        assert_eq!(order.state, OrderState::InProcess);
        assert!(f.sink.names().is_empty());
    }

    #[tokio::test]
    async fn test_missing_token_rejected_before_charging() {
        let f = fixture(vec![], 3);
        let mut order = saved_order(&f.repository).await;

        let err = f.orchestrator.create_payment(&mut order, Map::new()).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::Validation(_)));
        assert!(order.payments().is_empty());
        assert!(f.gateway.requests().is_empty());
    }

    #[tokio::test]
    async fn test_paid_order_cannot_be_charged_again() {
        let f = fixture(vec![], 3);
        let mut order = saved_order(&f.repository).await;
        f.orchestrator.create_payment(&mut order, token("tok_visa")).await.unwrap();

        let err = f.orchestrator.create_payment(&mut order, token("tok_visa")).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotPayable(OrderState::Paid)));
    }

    #[tokio::test]
    async fn test_refunds_update_order_state() {
        let f = fixture(vec![], 3);
        let mut order = saved_order(&f.repository).await;
        f.orchestrator.create_payment(&mut order, token("tok_visa")).await.unwrap();

        f.orchestrator.record_refund(&mut order, Decimal::new(1000, 2)).await.unwrap();
        assert_eq!(order.state, OrderState::PartiallyRefunded);
        assert_eq!(order.total_refunded(), Some(Decimal::new(1000, 2)));

        let err = f.orchestrator.record_refund(&mut order, Decimal::new(5000, 2)).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));

        f.orchestrator.record_refund(&mut order, Decimal::new(1876, 2)).await.unwrap();
        assert_eq!(order.state, OrderState::Refunded);
        assert_eq!(order.total_refunded(), order.total());
    }

    #[tokio::test]
    async fn test_retries_reuse_idempotency_key() {
        let f = fixture(
            vec![Err(GatewayError::retryable("timeout")), Err(GatewayError::retryable("timeout"))],
            3,
        );
        let mut order = saved_order(&f.repository).await;

        let payment = f.orchestrator.create_payment(&mut order, token("tok_visa")).await.unwrap();

        let expected = payment.id.simple().to_string();
        let requests = f.gateway.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.idempotency_key.as_deref() == Some(expected.as_str())));
        assert_eq!(payment.transactions()[0].request_data()["idempotency_key"], json!(expected));
        assert_eq!(payment.transactions()[0].request_data()["source"], json!("XXXXvisa"));
    }

    #[tokio::test]
    async fn test_empty_order_is_not_charged() {
        let f = fixture(vec![], 3);
        let mut order = Order::new("CAD").unwrap();
        f.repository.save(&mut order).await.unwrap();

        let err = f.orchestrator.create_payment(&mut order, token("tok_visa")).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::Validation(_)));
        assert!(order.payments().is_empty());
        assert_eq!(order.state, OrderState::New);
        assert!(f.gateway.requests().is_empty());
        let stored = f.repository.find(order.id).await.unwrap().unwrap();
        assert!(stored.payments().is_empty());
    }

    #[tokio::test]
    async fn test_open_payment_blocks_another_charge() {
        let f = fixture(vec![Ok(redirect())], 3);
        let mut order = saved_order(&f.repository).await;
        let pending = f.orchestrator.create_payment(&mut order, token("tok_visa")).await.unwrap();

        let err = f.orchestrator.create_payment(&mut order, token("tok_visa")).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::PaymentInProgress(id) if id == pending.id));
        assert_eq!(order.payments().len(), 1);
        assert_eq!(f.gateway.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_confirm_pending_payment() {
        let f = fixture(vec![Ok(redirect())], 3);
        let mut order = saved_order(&f.repository).await;
        let pending = f.orchestrator.create_payment(&mut order, token("tok_visa")).await.unwrap();

        let payment = f
            .orchestrator
            .settle_payment(&mut order, pending.id, PaymentState::Success)
            .await
            .unwrap();

        assert_eq!(payment.state(), PaymentState::Success);
        assert_eq!(order.state, OrderState::Paid);
        assert_eq!(f.sink.names(), vec![PAYMENT_SUCCEEDED.to_string()]);
        let stored = f.repository.find(order.id).await.unwrap().unwrap();
        assert_eq!(stored.payment(pending.id).unwrap().state(), PaymentState::Success);

        let err = f
            .orchestrator
            .settle_payment(&mut order, pending.id, PaymentState::Cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NotPending(PaymentState::Success)));
    }

    #[tokio::test]
    async fn test_cancelled_payment_can_be_paid_again() {
        let f = fixture(vec![Ok(redirect())], 3);
        let mut order = saved_order(&f.repository).await;
        let pending = f.orchestrator.create_payment(&mut order, token("tok_visa")).await.unwrap();

        let cancelled = f
            .orchestrator
            .settle_payment(&mut order, pending.id, PaymentState::Cancel)
            .await
            .unwrap();
        assert_eq!(cancelled.state(), PaymentState::Cancel);
        assert_eq!(order.state, OrderState::Incomplete);
        assert!(f.sink.names().is_empty());

        let payment = f.orchestrator.create_payment(&mut order, token("tok_visa")).await.unwrap();
        assert_eq!(payment.state(), PaymentState::Success);
        assert_eq!(order.state, OrderState::Paid);
        assert_eq!(order.payments().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_settlement_reports_failure() {
        let f = fixture(vec![Ok(ChargeResponse::with_status("ch_async", ChargeStatus::Pending))], 3);
        let mut order = saved_order(&f.repository).await;
        let pending = f.orchestrator.create_payment(&mut order, token("tok_visa")).await.unwrap();
        assert_eq!(pending.state(), PaymentState::Pending);

        let err = f
            .orchestrator
            .settle_payment(&mut order, pending.id, PaymentState::PendingUser)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));

        let failed = f
            .orchestrator
            .settle_payment(&mut order, pending.id, PaymentState::Error)
            .await
            .unwrap();
        assert_eq!(failed.state(), PaymentState::Error);
        assert_eq!(order.state, OrderState::Incomplete);
        assert_eq!(f.sink.names(), vec![PAYMENT_FAILED.to_string()]);

        let err = f
            .orchestrator
            .settle_payment(&mut order, Uuid::new_v4(), PaymentState::Error)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Order(OrderError::PaymentNotFound(_))));
    }

    #[tokio::test]
    async fn test_event_delivery_failure_keeps_payment() {
        let repository = Arc::new(InMemoryOrderRepository::new());
        let orchestrator = PaymentOrchestrator::new(
            Arc::new(MockGateway::new()),
            Arc::new(UnreachableSink),
            repository.clone(),
            RetryPolicy::none(),
        );
        let mut order = saved_order(&repository).await;

        let payment = orchestrator.create_payment(&mut order, token("tok_visa")).await.unwrap();

        assert_eq!(payment.state(), PaymentState::Success);
        assert_eq!(order.state, OrderState::Paid);
    }
}
