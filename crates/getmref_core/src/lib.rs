//! GetMRef core
//!
//! This crate implements the reference-processing engine behind the
//! `getmref` tool: it scans LaTeX bibliography files for references in the
//! `\bibitem`, BibTeX and amsrefs syntaxes, resolves them against the AMS
//! BatchMRef service in bounded batches, and rewrites the document with
//! `\MR{...}` numbers spliced into each matched reference. Optionally it
//! renders the matched references into one of the service's output syntaxes.
//!
//! The crate is transport-agnostic: callers hand the [`Pipeline`] a
//! [`LookupService`] implementation, so the HTTP client (and anything else
//! with side effects) stays outside.

pub mod error;
pub mod insert;
pub mod lookup;
pub mod patterns;
pub mod pipeline;
pub mod query;
pub mod record;
pub mod segment;

pub use error::{GetmrefError, Result};
pub use insert::{aux_envelope, OutputSyntax};
pub use lookup::{DisabledLookup, LookupError, LookupService};
pub use pipeline::{Pipeline, RunContext, RunOutput, RunStats, ITEM_LIMIT};
pub use record::{Batch, Family, Record, RecordStatus, SkipReason};
