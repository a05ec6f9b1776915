//! Routing of decoded order events onto the invoice lifecycle.

use tracing::{debug, instrument};

use shipbill_core::InvoiceId;
use shipbill_invoicing::{InvoiceLifecycle, InvoiceStore, StoreError};

use crate::decoder::OrderEvent;

/// Classification of one handled event.
///
/// The router folds store errors into these variants so the runner's
/// ack policy stays purely mechanical, with no business-logic branching at
/// the transport boundary.
#[derive(Debug)]
pub enum RouteOutcome {
    /// Status was not "Shipped"; correctly consumed, nothing to do.
    Ignored,

    /// The invoice is in `Sent` state. Covers both the first transition and
    /// the no-op replay; the lifecycle logs which one it was.
    Sent { invoice_id: InvoiceId },

    /// No invoice exists yet for the order; may resolve on redelivery.
    Deferred,

    /// Transient store failure; retryable.
    Failed(StoreError),
}

/// Stateless router: filters for shipped orders and invokes the lifecycle.
///
/// Side effects are confined to the invoice store; the router holds no state
/// of its own.
#[derive(Debug, Clone)]
pub struct ShipmentEventRouter<S> {
    lifecycle: InvoiceLifecycle<S>,
}

impl<S> ShipmentEventRouter<S>
where
    S: InvoiceStore,
{
    pub fn new(lifecycle: InvoiceLifecycle<S>) -> Self {
        Self { lifecycle }
    }

    #[instrument(skip(self, event), fields(order_id = %event.order_id, status = %event.status))]
    pub async fn handle(&self, event: &OrderEvent) -> RouteOutcome {
        if !event.is_shipped() {
            // Irrelevant statuses never touch the store.
            debug!("ignoring non-shipped order event");
            return RouteOutcome::Ignored;
        }

        match self.lifecycle.send_by_order(&event.order_id).await {
            Ok(invoice) => RouteOutcome::Sent {
                invoice_id: invoice.id,
            },
            Err(StoreError::NotFound) => RouteOutcome::Deferred,
            Err(err) => RouteOutcome::Failed(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use shipbill_core::{DocumentRef, OrderId};
    use shipbill_invoicing::{Invoice, InvoiceStore, StoreResult};

    use crate::decoder::decode_order_event;

    use super::*;

    /// Store double that counts accesses and serves one canned invoice.
    #[derive(Debug)]
    struct CountingStore {
        invoice: Option<Invoice>,
        calls: AtomicU32,
        fail_backend: bool,
    }

    impl CountingStore {
        fn empty() -> Self {
            Self {
                invoice: None,
                calls: AtomicU32::new(0),
                fail_backend: false,
            }
        }

        fn with_invoice(order_id: &str) -> Self {
            let invoice = Invoice::new(
                InvoiceId::new(),
                OrderId::new(order_id).unwrap(),
                DocumentRef::new("https://docs.example.com/inv.pdf").unwrap(),
                Utc::now(),
            );
            Self {
                invoice: Some(invoice),
                calls: AtomicU32::new(0),
                fail_backend: false,
            }
        }

        fn failing() -> Self {
            Self {
                invoice: None,
                calls: AtomicU32::new(0),
                fail_backend: true,
            }
        }

        fn store_calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn touch(&self) -> StoreResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_backend {
                return Err(StoreError::backend("store unavailable"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl InvoiceStore for CountingStore {
        async fn create(
            &self,
            _order_id: OrderId,
            _document_ref: DocumentRef,
        ) -> StoreResult<Invoice> {
            unreachable!("router never creates invoices")
        }

        async fn find_by_id(&self, _id: InvoiceId) -> StoreResult<Invoice> {
            self.touch()?;
            self.invoice.clone().ok_or(StoreError::NotFound)
        }

        async fn find_by_order(&self, order_id: &OrderId) -> StoreResult<Invoice> {
            self.touch()?;
            self.invoice
                .clone()
                .filter(|i| &i.order_id == order_id)
                .ok_or(StoreError::NotFound)
        }

        async fn list(&self) -> StoreResult<Vec<Invoice>> {
            self.touch()?;
            Ok(self.invoice.clone().into_iter().collect())
        }

        async fn mark_sent(
            &self,
            _id: InvoiceId,
            sent_at: DateTime<Utc>,
        ) -> StoreResult<Invoice> {
            self.touch()?;
            let mut invoice = self.invoice.clone().ok_or(StoreError::NotFound)?;
            invoice.sent_at.get_or_insert(sent_at);
            Ok(invoice)
        }
    }

    fn router(store: CountingStore) -> (ShipmentEventRouter<Arc<CountingStore>>, Arc<CountingStore>) {
        let store = Arc::new(store);
        (
            ShipmentEventRouter::new(InvoiceLifecycle::new(store.clone())),
            store,
        )
    }

    #[tokio::test]
    async fn non_shipped_event_is_ignored_without_store_access() {
        let (router, store) = router(CountingStore::with_invoice("O42"));
        let event =
            decode_order_event(br#"{"orderId":"O42","status":"Pending"}"#).unwrap();

        let outcome = router.handle(&event).await;
        assert!(matches!(outcome, RouteOutcome::Ignored));
        assert_eq!(store.store_calls(), 0);
    }

    #[tokio::test]
    async fn shipped_event_sends_matching_invoice() {
        let (router, _store) = router(CountingStore::with_invoice("O42"));
        let event =
            decode_order_event(br#"{"orderId":"O42","status":"Shipped"}"#).unwrap();

        let outcome = router.handle(&event).await;
        assert!(matches!(outcome, RouteOutcome::Sent { .. }));
    }

    #[tokio::test]
    async fn shipped_event_for_unknown_order_is_deferred() {
        let (router, _store) = router(CountingStore::empty());
        let event =
            decode_order_event(br#"{"orderId":"O7","status":"Shipped"}"#).unwrap();

        let outcome = router.handle(&event).await;
        assert!(matches!(outcome, RouteOutcome::Deferred));
    }

    #[tokio::test]
    async fn backend_failure_is_failed_not_deferred() {
        let (router, _store) = router(CountingStore::failing());
        let event =
            decode_order_event(br#"{"orderId":"O7","status":"Shipped"}"#).unwrap();

        match router.handle(&event).await {
            RouteOutcome::Failed(StoreError::Backend(_)) => {}
            other => panic!("expected Failed(Backend), got {other:?}"),
        }
    }
}
