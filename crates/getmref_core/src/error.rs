use thiserror::Error;

use crate::lookup::LookupError;

#[derive(Debug, Error)]
pub enum GetmrefError {
    /// A composed query fragment does not parse as well-formed XML; aborts
    /// only the record it belongs to.
    #[error("malformed query fragment for record {id}: {message}")]
    Validation { id: u32, message: String },

    /// The lookup service could not be reached or answered with a
    /// non-success status; aborts the whole open batch.
    #[error(transparent)]
    Transport(#[from] LookupError),

    /// The batch response envelope was unusable as a whole.
    #[error("malformed batch response: {0}")]
    ResponseParse(String),
}

pub type Result<T> = std::result::Result<T, GetmrefError>;
