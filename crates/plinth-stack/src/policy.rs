//! Opaque policy and template documents.
//!
//! Permission policies and the gateway request-mapping template are consumed
//! verbatim as byte blobs. The only contract enforced here is that a
//! document is not empty; its internal grammar is the provider's business.

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading documents.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("document '{0}' is empty")]
    Empty(String),
}

/// An opaque document blob, validated non-empty and never parsed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    name: String,
    bytes: Vec<u8>,
}

impl PolicyDocument {
    /// Wraps raw bytes, rejecting empty or whitespace-only documents.
    pub fn from_bytes(name: &str, bytes: Vec<u8>) -> Result<Self, DocumentError> {
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(DocumentError::Empty(name.to_owned()));
        }
        Ok(Self {
            name: name.to_owned(),
            bytes,
        })
    }

    /// Reads a document from disk, keyed by its file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("reading policy document {}", path.display()))?;
        Self::from_bytes(&path.display().to_string(), bytes).map_err(Into::into)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for PolicyDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyDocument")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// The three externally supplied documents the ingest stack consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackDocuments {
    /// Permission policy attached to the compute role.
    pub compute_policy: PolicyDocument,
    /// Permission policy attached to the gateway role.
    pub gateway_policy: PolicyDocument,
    /// Request-mapping template for the gateway integration.
    pub request_template: PolicyDocument,
}
