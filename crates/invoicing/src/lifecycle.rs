//! Invoice lifecycle service: the idempotent send transition.

use chrono::Utc;
use tracing::{debug, instrument};

use shipbill_core::{DocumentRef, InvoiceId, OrderId};

use crate::invoice::Invoice;
use crate::store::{InvoiceStore, StoreResult};

/// Enforces valid invoice transitions on top of an [`InvoiceStore`].
///
/// The state machine is `Created -> Sent`, with `Sent -> Sent` permitted as a
/// no-op self-transition so replayed deliveries are harmless. The service
/// never caches invoice state across calls; every transition re-reads the
/// current record and delegates the actual write to the store's conditional
/// `mark_sent`, which is the single serialization point.
#[derive(Debug, Clone)]
pub struct InvoiceLifecycle<S> {
    store: S,
}

impl<S> InvoiceLifecycle<S>
where
    S: InvoiceStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Issue a new invoice for an order.
    ///
    /// Fails `Conflict` if the order already has one (one invoice per order).
    #[instrument(skip(self, document_ref), fields(order_id = %order_id))]
    pub async fn create(
        &self,
        order_id: OrderId,
        document_ref: DocumentRef,
    ) -> StoreResult<Invoice> {
        let invoice = self.store.create(order_id, document_ref).await?;
        debug!(invoice_id = %invoice.id, "invoice created");
        Ok(invoice)
    }

    /// Transition an invoice to `Sent`, idempotently.
    ///
    /// Safe to call any number of times: once sent, further calls return the
    /// record with its original `sent_at` and write nothing. `NotFound` is
    /// propagated, not retried; the caller decides what absence means.
    #[instrument(skip(self), fields(invoice_id = %id))]
    pub async fn send(&self, id: InvoiceId) -> StoreResult<Invoice> {
        // Re-read so a stale caller can never resurrect a deleted record.
        let current = self.store.find_by_id(id).await?;
        let invoice = self.store.mark_sent(current.id, Utc::now()).await?;
        debug!(
            order_id = %invoice.order_id,
            already_sent = current.is_sent(),
            "invoice send transition"
        );
        Ok(invoice)
    }

    /// Resolve an order to its invoice, then perform the send transition.
    ///
    /// Fails `NotFound` when no invoice exists yet for the order, which the
    /// dispatch pipeline treats as "the shipment event arrived first".
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn send_by_order(&self, order_id: &OrderId) -> StoreResult<Invoice> {
        let invoice = self.store.find_by_order(order_id).await?;
        let sent = self.store.mark_sent(invoice.id, Utc::now()).await?;
        debug!(
            invoice_id = %sent.id,
            already_sent = invoice.is_sent(),
            "invoice sent for shipped order"
        );
        Ok(sent)
    }

    pub async fn get(&self, id: InvoiceId) -> StoreResult<Invoice> {
        self.store.find_by_id(id).await
    }

    pub async fn get_by_order(&self, order_id: &OrderId) -> StoreResult<Invoice> {
        self.store.find_by_order(order_id).await
    }

    pub async fn list(&self) -> StoreResult<Vec<Invoice>> {
        self.store.list().await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use crate::store::{StoreError, StoreResult};

    use super::*;

    /// Minimal store double; the real backends live in the infra crate.
    #[derive(Debug, Default)]
    struct MemStore {
        records: Mutex<HashMap<InvoiceId, Invoice>>,
        mark_sent_writes: Mutex<u32>,
    }

    impl MemStore {
        fn writes(&self) -> u32 {
            *self.mark_sent_writes.lock().unwrap()
        }
    }

    #[async_trait]
    impl InvoiceStore for MemStore {
        async fn create(
            &self,
            order_id: OrderId,
            document_ref: DocumentRef,
        ) -> StoreResult<Invoice> {
            let mut records = self.records.lock().unwrap();
            if records.values().any(|i| i.order_id == order_id) {
                return Err(StoreError::conflict(format!(
                    "invoice already exists for order {order_id}"
                )));
            }
            let invoice =
                Invoice::new(InvoiceId::new(), order_id, document_ref, Utc::now());
            records.insert(invoice.id, invoice.clone());
            Ok(invoice)
        }

        async fn find_by_id(&self, id: InvoiceId) -> StoreResult<Invoice> {
            self.records
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or(StoreError::NotFound)
        }

        async fn find_by_order(&self, order_id: &OrderId) -> StoreResult<Invoice> {
            self.records
                .lock()
                .unwrap()
                .values()
                .filter(|i| &i.order_id == order_id)
                .max_by_key(|i| i.created_at)
                .cloned()
                .ok_or(StoreError::NotFound)
        }

        async fn list(&self) -> StoreResult<Vec<Invoice>> {
            let mut all: Vec<Invoice> =
                self.records.lock().unwrap().values().cloned().collect();
            all.sort_by_key(|i| i.created_at);
            Ok(all)
        }

        async fn mark_sent(
            &self,
            id: InvoiceId,
            sent_at: DateTime<Utc>,
        ) -> StoreResult<Invoice> {
            let mut records = self.records.lock().unwrap();
            let invoice = records.get_mut(&id).ok_or(StoreError::NotFound)?;
            if invoice.sent_at.is_none() {
                invoice.sent_at = Some(sent_at);
                *self.mark_sent_writes.lock().unwrap() += 1;
            }
            Ok(invoice.clone())
        }
    }

    fn order(id: &str) -> OrderId {
        OrderId::new(id).unwrap()
    }

    fn doc() -> DocumentRef {
        DocumentRef::new("https://docs.example.com/inv.pdf").unwrap()
    }

    fn lifecycle() -> InvoiceLifecycle<Arc<MemStore>> {
        InvoiceLifecycle::new(Arc::new(MemStore::default()))
    }

    #[tokio::test]
    async fn create_then_find_by_order_round_trip() {
        let lifecycle = lifecycle();
        let created = lifecycle.create(order("O1"), doc()).await.unwrap();

        let found = lifecycle.get_by_order(&order("O1")).await.unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.order_id, order("O1"));
        assert_eq!(found.sent_at, None);
    }

    #[tokio::test]
    async fn create_rejects_duplicate_order() {
        let lifecycle = lifecycle();
        lifecycle.create(order("O1"), doc()).await.unwrap();

        let err = lifecycle.create(order("O1"), doc()).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn send_is_idempotent() {
        let lifecycle = lifecycle();
        let invoice = lifecycle.create(order("O1"), doc()).await.unwrap();

        let first = lifecycle.send(invoice.id).await.unwrap();
        let sent_at = first.sent_at.expect("sent_at set by first send");

        let second = lifecycle.send(invoice.id).await.unwrap();
        assert_eq!(second.sent_at, Some(sent_at));
        assert_eq!(lifecycle.store().writes(), 1);
    }

    #[tokio::test]
    async fn send_unknown_invoice_is_not_found() {
        let lifecycle = lifecycle();
        let err = lifecycle.send(InvoiceId::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn send_by_order_unknown_order_is_not_found() {
        let lifecycle = lifecycle();
        let err = lifecycle
            .send_by_order(&order("no-such-order"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn concurrent_sends_produce_one_effective_write() {
        let lifecycle = Arc::new(lifecycle());
        let invoice = lifecycle.create(order("O1"), doc()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lc = lifecycle.clone();
            let id = invoice.id;
            handles.push(tokio::spawn(async move { lc.send(id).await }));
        }

        let mut observed = Vec::new();
        for h in handles {
            observed.push(h.await.unwrap().unwrap().sent_at.unwrap());
        }

        assert!(observed.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(lifecycle.store().writes(), 1);
    }

    mod proptest_tests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            /// Property: any number of repeated sends leaves the record with
            /// the `sent_at` of the first send.
            #[test]
            fn repeated_sends_never_change_sent_at(extra_sends in 1usize..16) {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .unwrap();
                rt.block_on(async {
                    let lifecycle = lifecycle();
                    let invoice =
                        lifecycle.create(order("O1"), doc()).await.unwrap();

                    let first = lifecycle.send(invoice.id).await.unwrap();
                    let sent_at = first.sent_at.unwrap();

                    for _ in 0..extra_sends {
                        let again = lifecycle.send(invoice.id).await.unwrap();
                        prop_assert_eq!(again.sent_at, Some(sent_at));
                    }
                    prop_assert_eq!(lifecycle.store().writes(), 1);
                    Ok(())
                })?;
            }
        }
    }
}
