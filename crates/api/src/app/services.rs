//! Infrastructure wiring: store selection and the shared lifecycle service.

use std::sync::Arc;

use shipbill_infra::InMemoryInvoiceStore;
use shipbill_invoicing::{InvoiceLifecycle, InvoiceStore};

use crate::config::ApiConfig;

/// The handler-facing services, shared with the subscription runner.
pub struct AppServices {
    pub lifecycle: InvoiceLifecycle<Arc<dyn InvoiceStore>>,
}

impl AppServices {
    pub fn new(store: Arc<dyn InvoiceStore>) -> Self {
        Self {
            lifecycle: InvoiceLifecycle::new(store),
        }
    }
}

/// Pick the invoice store from configuration.
///
/// `DATABASE_URL` selects Postgres; without it the process falls back to the
/// volatile in-memory store.
pub async fn build_store(config: &ApiConfig) -> anyhow::Result<Arc<dyn InvoiceStore>> {
    match &config.database_url {
        Some(url) => {
            let store = shipbill_infra::PostgresInvoiceStore::connect(url).await?;
            tracing::info!("using postgres invoice store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using volatile in-memory invoice store");
            Ok(Arc::new(InMemoryInvoiceStore::new()))
        }
    }
}
