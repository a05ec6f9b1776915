//! Invoice domain: the record, its lifecycle, and the persistence contract.

pub mod invoice;
pub mod lifecycle;
pub mod store;

pub use invoice::{Invoice, InvoiceState};
pub use lifecycle::InvoiceLifecycle;
pub use store::{InvoiceStore, StoreError, StoreResult};
