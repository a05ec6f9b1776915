//! Shared domain primitives: identifiers, value objects, error model.

pub mod document_ref;
pub mod error;
pub mod id;

pub use document_ref::DocumentRef;
pub use error::{DomainError, DomainResult};
pub use id::{InvoiceId, OrderId};
