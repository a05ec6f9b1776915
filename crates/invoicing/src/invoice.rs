use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shipbill_core::{DocumentRef, InvoiceId, OrderId};

/// Lifecycle state of an invoice.
///
/// Fully derived from `sent_at`; there is deliberately no stored status
/// column that could drift out of sync with the timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceState {
    Created,
    Sent,
}

/// An issued invoice.
///
/// The store backend exclusively owns persisted state; this struct is a
/// snapshot read from it. `id`, `order_id`, `document_ref` and `created_at`
/// are immutable; `sent_at` is set exactly once by a conditional update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub order_id: OrderId,
    pub document_ref: DocumentRef,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Invoice {
    /// A freshly created, not-yet-sent invoice.
    pub fn new(
        id: InvoiceId,
        order_id: OrderId,
        document_ref: DocumentRef,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            order_id,
            document_ref,
            created_at,
            sent_at: None,
        }
    }

    pub fn state(&self) -> InvoiceState {
        if self.sent_at.is_some() {
            InvoiceState::Sent
        } else {
            InvoiceState::Created
        }
    }

    pub fn is_sent(&self) -> bool {
        self.sent_at.is_some()
    }
}
