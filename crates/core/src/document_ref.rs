//! Reference to an invoice's rendered artifact.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Value object: where the rendered invoice document lives (e.g. a PDF URL).
///
/// Opaque to the rest of the system; only well-formedness is checked at
/// construction. Compared by value, immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentRef(String);

impl DocumentRef {
    /// Validate and wrap a document reference.
    ///
    /// Accepts http(s) URLs with a non-empty host and path-ish remainder.
    /// The artifact itself is never fetched by this system.
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let rest = value
            .strip_prefix("https://")
            .or_else(|| value.strip_prefix("http://"))
            .ok_or_else(|| {
                DomainError::validation("document_ref must be an http(s) URL")
            })?;

        let host = rest.split('/').next().unwrap_or("");
        if host.is_empty() {
            return Err(DomainError::validation("document_ref is missing a host"));
        }
        if rest.contains(char::is_whitespace) {
            return Err(DomainError::validation(
                "document_ref must not contain whitespace",
            ));
        }

        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_https_url() {
        let r = DocumentRef::new("https://docs.example.com/inv/42.pdf").unwrap();
        assert_eq!(r.as_str(), "https://docs.example.com/inv/42.pdf");
    }

    #[test]
    fn accepts_http_url() {
        assert!(DocumentRef::new("http://localhost:9000/bucket/inv.pdf").is_ok());
    }

    #[test]
    fn rejects_other_schemes_and_bare_strings() {
        assert!(DocumentRef::new("ftp://example.com/inv.pdf").is_err());
        assert!(DocumentRef::new("inv.pdf").is_err());
        assert!(DocumentRef::new("").is_err());
    }

    #[test]
    fn rejects_missing_host_and_whitespace() {
        assert!(DocumentRef::new("https:///inv.pdf").is_err());
        assert!(DocumentRef::new("https://example.com/my inv.pdf").is_err());
    }
}
