//! The seam between the pipeline and the BatchMRef transport.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("lookup service unreachable: {0}")]
    Unreachable(String),

    #[error("lookup service returned status {0}")]
    Status(u16),
}

/// Executes one batch request against the lookup service.
///
/// The request and response are the textual XML envelopes; the pipeline owns
/// composing the one and reconciling the other.
pub trait LookupService {
    fn execute(&self, request: &str) -> Result<String, LookupError>;
}

/// Stand-in service for runs with lookups disabled; never contacted.
pub struct DisabledLookup;

impl LookupService for DisabledLookup {
    fn execute(&self, _request: &str) -> Result<String, LookupError> {
        Ok(String::new())
    }
}
