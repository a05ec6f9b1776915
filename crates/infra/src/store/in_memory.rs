//! In-memory invoice store.
//!
//! Intended for tests/dev. The conditional `mark_sent` update runs inside
//! the write lock, which gives it the same linearizable-per-id behavior the
//! Postgres backend gets from its conditional UPDATE.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use shipbill_core::{DocumentRef, InvoiceId, OrderId};
use shipbill_invoicing::{Invoice, InvoiceStore, StoreError, StoreResult};

#[derive(Debug, Default)]
pub struct InMemoryInvoiceStore {
    inner: RwLock<Records>,
}

#[derive(Debug, Default)]
struct Records {
    by_id: HashMap<InvoiceId, Invoice>,
    by_order: HashMap<OrderId, InvoiceId>,
}

impl InMemoryInvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvoiceStore for InMemoryInvoiceStore {
    async fn create(
        &self,
        order_id: OrderId,
        document_ref: DocumentRef,
    ) -> StoreResult<Invoice> {
        let mut records = self
            .inner
            .write()
            .map_err(|_| StoreError::backend("lock poisoned"))?;

        if records.by_order.contains_key(&order_id) {
            return Err(StoreError::conflict(format!(
                "invoice already exists for order {order_id}"
            )));
        }

        let invoice =
            Invoice::new(InvoiceId::new(), order_id.clone(), document_ref, Utc::now());
        records.by_order.insert(order_id, invoice.id);
        records.by_id.insert(invoice.id, invoice.clone());
        Ok(invoice)
    }

    async fn find_by_id(&self, id: InvoiceId) -> StoreResult<Invoice> {
        let records = self
            .inner
            .read()
            .map_err(|_| StoreError::backend("lock poisoned"))?;
        records.by_id.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn find_by_order(&self, order_id: &OrderId) -> StoreResult<Invoice> {
        let records = self
            .inner
            .read()
            .map_err(|_| StoreError::backend("lock poisoned"))?;

        // The order index points at the only invoice for the order; fall
        // back to a scan picking the most recently created, mirroring the
        // Postgres query's ORDER BY, in case of legacy duplicates.
        if let Some(id) = records.by_order.get(order_id) {
            if let Some(invoice) = records.by_id.get(id) {
                return Ok(invoice.clone());
            }
        }
        records
            .by_id
            .values()
            .filter(|i| &i.order_id == order_id)
            .max_by_key(|i| (i.created_at, i.id))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list(&self) -> StoreResult<Vec<Invoice>> {
        let records = self
            .inner
            .read()
            .map_err(|_| StoreError::backend("lock poisoned"))?;
        let mut all: Vec<Invoice> = records.by_id.values().cloned().collect();
        all.sort_by_key(|i| (i.created_at, i.id));
        Ok(all)
    }

    async fn mark_sent(
        &self,
        id: InvoiceId,
        sent_at: DateTime<Utc>,
    ) -> StoreResult<Invoice> {
        let mut records = self
            .inner
            .write()
            .map_err(|_| StoreError::backend("lock poisoned"))?;

        let invoice = records.by_id.get_mut(&id).ok_or(StoreError::NotFound)?;
        // Set only if null; an already-sent record is returned unchanged.
        if invoice.sent_at.is_none() {
            invoice.sent_at = Some(sent_at);
        }
        Ok(invoice.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn order(id: &str) -> OrderId {
        OrderId::new(id).unwrap()
    }

    fn doc() -> DocumentRef {
        DocumentRef::new("https://docs.example.com/inv.pdf").unwrap()
    }

    #[tokio::test]
    async fn create_and_round_trip_by_order() {
        let store = InMemoryInvoiceStore::new();
        let created = store.create(order("O1"), doc()).await.unwrap();

        let by_order = store.find_by_order(&order("O1")).await.unwrap();
        assert_eq!(by_order.id, created.id);
        assert_eq!(by_order.sent_at, None);

        let by_id = store.find_by_id(created.id).await.unwrap();
        assert_eq!(by_id, by_order);
    }

    #[tokio::test]
    async fn duplicate_order_is_a_conflict() {
        let store = InMemoryInvoiceStore::new();
        store.create(order("O1"), doc()).await.unwrap();

        let err = store.create(order("O1"), doc()).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn find_unknown_is_not_found() {
        let store = InMemoryInvoiceStore::new();
        assert!(store.find_by_id(InvoiceId::new()).await.unwrap_err().is_not_found());
        assert!(store
            .find_by_order(&order("nope"))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn mark_sent_sets_only_if_null() {
        let store = InMemoryInvoiceStore::new();
        let invoice = store.create(order("O1"), doc()).await.unwrap();

        let t1 = Utc::now();
        let first = store.mark_sent(invoice.id, t1).await.unwrap();
        assert_eq!(first.sent_at, Some(t1));

        let t2 = t1 + chrono::Duration::seconds(60);
        let second = store.mark_sent(invoice.id, t2).await.unwrap();
        assert_eq!(second.sent_at, Some(t1), "sent_at must never change once set");
    }

    #[tokio::test]
    async fn mark_sent_unknown_is_not_found() {
        let store = InMemoryInvoiceStore::new();
        let err = store.mark_sent(InvoiceId::new(), Utc::now()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn concurrent_mark_sent_yields_one_sent_at() {
        let store = Arc::new(InMemoryInvoiceStore::new());
        let invoice = store.create(order("O1"), doc()).await.unwrap();

        let mut handles = Vec::new();
        for offset in 0..16i64 {
            let store = store.clone();
            let id = invoice.id;
            let when = Utc::now() + chrono::Duration::milliseconds(offset);
            handles.push(tokio::spawn(async move { store.mark_sent(id, when).await }));
        }

        let mut observed = Vec::new();
        for h in handles {
            observed.push(h.await.unwrap().unwrap().sent_at.unwrap());
        }
        assert!(
            observed.windows(2).all(|w| w[0] == w[1]),
            "all callers must observe the same final sent_at"
        );
    }

    #[tokio::test]
    async fn list_is_ordered_by_creation() {
        let store = InMemoryInvoiceStore::new();
        for n in 0..5 {
            store.create(order(&format!("O{n}")), doc()).await.unwrap();
        }

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 5);
        assert!(all.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }
}
