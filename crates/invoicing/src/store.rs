//! Persistence contract for invoice records.
//!
//! The store is the single owner of persisted invoice state. It makes no
//! storage assumptions: the in-memory backend (tests/dev) and the Postgres
//! backend (production) both live in the infra crate and implement this
//! trait.
//!
//! ## Conditional update
//!
//! `mark_sent` is the one operation with semantics beyond plain CRUD: it must
//! set `sent_at` **only if currently null**, atomically (compare-and-set or a
//! conditional SQL update, linearizable per invoice id). Two concurrent
//! `mark_sent` calls for the same invoice must produce exactly one effective
//! write, and both callers must observe the same final `sent_at`. The
//! already-sent case is not an error; callers get the existing record back
//! unchanged. This is what makes the dispatch pipeline safe under
//! at-least-once event delivery.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use shipbill_core::{DocumentRef, InvoiceId, OrderId};

use crate::invoice::Invoice;

pub type StoreResult<T> = Result<T, StoreError>;

/// Store operation error.
///
/// `NotFound` is recoverable from the pipeline's point of view (the record
/// may appear on redelivery); `Backend` is a transient infrastructure
/// failure; `Conflict` only arises at creation time.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invoice not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Durable store of invoice records.
///
/// Implementations must:
/// - reject a second invoice for the same `order_id` with `Conflict`
/// - resolve `find_by_order` deterministically to the most recently created
///   invoice should legacy duplicates exist
/// - implement `mark_sent` as an atomic set-only-if-null update
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Allocate an id, stamp `created_at`, persist with `sent_at = None`.
    async fn create(&self, order_id: OrderId, document_ref: DocumentRef)
        -> StoreResult<Invoice>;

    async fn find_by_id(&self, id: InvoiceId) -> StoreResult<Invoice>;

    async fn find_by_order(&self, order_id: &OrderId) -> StoreResult<Invoice>;

    /// All invoices, ordered by `created_at` ascending.
    async fn list(&self) -> StoreResult<Vec<Invoice>>;

    /// Set `sent_at` only if currently null; return the record either way.
    async fn mark_sent(
        &self,
        id: InvoiceId,
        sent_at: DateTime<Utc>,
    ) -> StoreResult<Invoice>;
}

#[async_trait]
impl<S> InvoiceStore for Arc<S>
where
    S: InvoiceStore + ?Sized,
{
    async fn create(
        &self,
        order_id: OrderId,
        document_ref: DocumentRef,
    ) -> StoreResult<Invoice> {
        (**self).create(order_id, document_ref).await
    }

    async fn find_by_id(&self, id: InvoiceId) -> StoreResult<Invoice> {
        (**self).find_by_id(id).await
    }

    async fn find_by_order(&self, order_id: &OrderId) -> StoreResult<Invoice> {
        (**self).find_by_order(order_id).await
    }

    async fn list(&self) -> StoreResult<Vec<Invoice>> {
        (**self).list().await
    }

    async fn mark_sent(
        &self,
        id: InvoiceId,
        sent_at: DateTime<Utc>,
    ) -> StoreResult<Invoice> {
        (**self).mark_sent(id, sent_at).await
    }
}
