//! Postgres-backed invoice store.
//!
//! Schema lives in `migrations/0001_invoices.sql`. The conditional
//! `mark_sent` update relies on Postgres row-level atomicity: `UPDATE ...
//! WHERE id = $1 AND sent_at IS NULL` commits for exactly one of any number
//! of concurrent callers, which is the linearizable-per-id guarantee the
//! lifecycle depends on. The unique index on `order_id` enforces
//! one-invoice-per-order and surfaces as `Conflict`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use shipbill_core::{DocumentRef, InvoiceId, OrderId};
use shipbill_invoicing::{Invoice, InvoiceStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
pub struct PostgresInvoiceStore {
    pool: Arc<PgPool>,
}

impl PostgresInvoiceStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| StoreError::backend(format!("postgres connect: {e}")))?;
        Ok(Self::new(pool))
    }
}

fn invoice_from_row(row: &PgRow) -> StoreResult<Invoice> {
    let id: Uuid = row
        .try_get("id")
        .map_err(|e| StoreError::backend(format!("invoice row: {e}")))?;
    let order_id: String = row
        .try_get("order_id")
        .map_err(|e| StoreError::backend(format!("invoice row: {e}")))?;
    let document_ref: String = row
        .try_get("document_ref")
        .map_err(|e| StoreError::backend(format!("invoice row: {e}")))?;
    let created_at: DateTime<Utc> = row
        .try_get("created_at")
        .map_err(|e| StoreError::backend(format!("invoice row: {e}")))?;
    let sent_at: Option<DateTime<Utc>> = row
        .try_get("sent_at")
        .map_err(|e| StoreError::backend(format!("invoice row: {e}")))?;

    let order_id = OrderId::new(order_id)
        .map_err(|e| StoreError::backend(format!("stored order_id invalid: {e}")))?;
    let document_ref = DocumentRef::new(document_ref)
        .map_err(|e| StoreError::backend(format!("stored document_ref invalid: {e}")))?;

    Ok(Invoice {
        id: InvoiceId::from_uuid(id),
        order_id,
        document_ref,
        created_at,
        sent_at,
    })
}

fn map_sqlx_error(op: &str, err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::conflict(format!("{op}: {}", db.message()))
        }
        _ => StoreError::backend(format!("{op}: {err}")),
    }
}

#[async_trait]
impl InvoiceStore for PostgresInvoiceStore {
    #[instrument(skip(self, document_ref), fields(order_id = %order_id), err)]
    async fn create(
        &self,
        order_id: OrderId,
        document_ref: DocumentRef,
    ) -> StoreResult<Invoice> {
        let id = InvoiceId::new();
        let row = sqlx::query(
            "INSERT INTO invoices (id, order_id, document_ref, created_at) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, order_id, document_ref, created_at, sent_at",
        )
        .bind(id.as_uuid())
        .bind(order_id.as_str())
        .bind(document_ref.as_str())
        .bind(Utc::now())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create", e))?;

        invoice_from_row(&row)
    }

    #[instrument(skip(self), fields(invoice_id = %id), err)]
    async fn find_by_id(&self, id: InvoiceId) -> StoreResult<Invoice> {
        let row = sqlx::query(
            "SELECT id, order_id, document_ref, created_at, sent_at \
             FROM invoices WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_id", e))?;

        match row {
            Some(row) => invoice_from_row(&row),
            None => Err(StoreError::NotFound),
        }
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn find_by_order(&self, order_id: &OrderId) -> StoreResult<Invoice> {
        // Deterministic under legacy duplicates: most recently created wins.
        let row = sqlx::query(
            "SELECT id, order_id, document_ref, created_at, sent_at \
             FROM invoices WHERE order_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(order_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_order", e))?;

        match row {
            Some(row) => invoice_from_row(&row),
            None => Err(StoreError::NotFound),
        }
    }

    #[instrument(skip(self), err)]
    async fn list(&self) -> StoreResult<Vec<Invoice>> {
        let rows = sqlx::query(
            "SELECT id, order_id, document_ref, created_at, sent_at \
             FROM invoices ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list", e))?;

        rows.iter().map(invoice_from_row).collect()
    }

    #[instrument(skip(self), fields(invoice_id = %id), err)]
    async fn mark_sent(
        &self,
        id: InvoiceId,
        sent_at: DateTime<Utc>,
    ) -> StoreResult<Invoice> {
        // Conditional update: commits for exactly one concurrent caller.
        let updated = sqlx::query(
            "UPDATE invoices SET sent_at = $2 \
             WHERE id = $1 AND sent_at IS NULL \
             RETURNING id, order_id, document_ref, created_at, sent_at",
        )
        .bind(id.as_uuid())
        .bind(sent_at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_sent", e))?;

        if let Some(row) = updated {
            return invoice_from_row(&row);
        }

        // Zero rows: either already sent (return unchanged) or absent.
        self.find_by_id(id).await
    }
}
