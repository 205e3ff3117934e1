//! The end-to-end run: segmentation, batching, lookup, reassembly.

use std::thread;
use std::time::Duration;

use crate::insert::{insert_identifier, OutputSyntax};
use crate::lookup::LookupService;
use crate::patterns::RecordPatterns;
use crate::query::{extract_field_values, reconcile, QueryBuilder};
use crate::record::{Batch, Family, Record, RecordStatus, SkipReason};
use crate::segment::{Segment, Segmenter};

/// Hard service-side cap on items per request.
pub const ITEM_LIMIT: usize = 100;

/// Per-run settings, fixed before the first line is read.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Requested reformatted-output syntax; `None` rewrites the document only.
    pub output: Option<OutputSyntax>,
    /// BibTeX style written to the aux file.
    pub bibstyle: String,
    /// Recognize records only inside a bibliography environment. When the
    /// whole input yields no record this way, the run falls back to scanning
    /// everything.
    pub require_env: bool,
    /// Drop full-comment lines from the rewritten records.
    pub clean_comments: bool,
    /// Items per batch request, capped at [`ITEM_LIMIT`].
    pub item_limit: usize,
    /// Pause between consecutive batch requests.
    pub wait: Duration,
    /// Process everything but never contact the service.
    pub disable_lookups: bool,
    /// 0 writes records back plain; 1 prefixes each with its query string,
    /// 2 with its outcome, 3 with both, as TeX comments.
    pub verbosity: u8,
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            output: None,
            bibstyle: "plain".to_string(),
            require_env: true,
            clean_comments: false,
            item_limit: ITEM_LIMIT,
            wait: Duration::from_secs(10),
            disable_lookups: false,
            verbosity: 0,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub total: usize,
    pub found: usize,
    pub not_found: usize,
    pub skipped: usize,
    pub query_errors: usize,
}

/// Everything a run produces; writing it anywhere is the caller's business.
#[derive(Debug)]
pub struct RunOutput {
    /// The rewritten document. Text outside the records is byte-identical to
    /// the input.
    pub document: String,
    /// Reformatted references in their document envelope; present only when
    /// an output syntax was requested and at least one record was recognized.
    pub formatted: Option<String>,
    /// One `\citation` line per record, in document order.
    pub citations: String,
    pub stats: RunStats,
    pub batches_dispatched: usize,
    pub batches_failed: usize,
}

struct ScanState {
    document: String,
    /// Environment-end marker and everything after it, re-emitted only after
    /// the last record has been written back.
    tail: Vec<String>,
    in_tail: bool,
    data: String,
    citations: String,
    stats: RunStats,
    dispatched: usize,
    failed: usize,
    pseudo_key: u32,
}

impl ScanState {
    fn new() -> Self {
        Self {
            document: String::new(),
            tail: Vec::new(),
            in_tail: false,
            data: String::new(),
            citations: String::new(),
            stats: RunStats::default(),
            dispatched: 0,
            failed: 0,
            pseudo_key: 0,
        }
    }
}

pub struct Pipeline<'a> {
    ctx: &'a RunContext,
    lookup: &'a dyn LookupService,
    patterns: RecordPatterns,
}

impl<'a> Pipeline<'a> {
    pub fn new(ctx: &'a RunContext, lookup: &'a dyn LookupService) -> Self {
        Self {
            ctx,
            lookup,
            patterns: RecordPatterns::default(),
        }
    }

    /// Process one document, given as lines with their line ends attached.
    pub fn run(&self, lines: &[String]) -> RunOutput {
        let mut scan = self.scan(lines, self.ctx.require_env);
        if scan.stats.total == 0 && self.ctx.require_env {
            tracing::debug!(
                "no records inside a bibliography environment, rescanning the whole input"
            );
            scan = self.scan(lines, false);
        }

        let formatted = match self.ctx.output {
            Some(syntax) if scan.stats.total > 0 => {
                Some(syntax.document_envelope(scan.stats.total, &scan.data))
            }
            _ => None,
        };
        RunOutput {
            document: scan.document,
            formatted,
            citations: scan.citations,
            stats: scan.stats,
            batches_dispatched: scan.dispatched,
            batches_failed: scan.failed,
        }
    }

    fn scan(&self, lines: &[String], require_env: bool) -> ScanState {
        let limit = self.ctx.item_limit.clamp(1, ITEM_LIMIT);
        let outtype = self
            .ctx
            .output
            .map_or("tex", OutputSyntax::query_outtype);

        let mut state = ScanState::new();
        let mut builder = QueryBuilder::new(outtype);
        let mut batch = Batch::new();

        for segment in Segmenter::new(lines.iter().cloned(), &self.patterns, require_env) {
            match segment {
                Segment::EnvBegin(line) => state.document.push_str(&line),
                Segment::EnvEnd(line) => {
                    state.in_tail = true;
                    state.tail.push(line);
                }
                Segment::Passthrough(line) => {
                    if state.in_tail {
                        state.tail.push(line);
                    } else {
                        state.document.push_str(&line);
                    }
                }
                Segment::Eof(text) => {
                    if !text.is_empty() {
                        state.tail.push(text);
                    }
                }
                Segment::Record(record) => {
                    self.admit(record, &mut state, &mut builder, &mut batch);
                    if builder.len() >= limit {
                        self.dispatch(&mut builder, &mut batch, &mut state);
                        self.write_back(&mut batch, &mut state);
                        if !self.ctx.disable_lookups && !self.ctx.wait.is_zero() {
                            thread::sleep(self.ctx.wait);
                        }
                    }
                }
            }
        }

        self.dispatch(&mut builder, &mut batch, &mut state);
        self.write_back(&mut batch, &mut state);
        for line in state.tail.drain(..) {
            state.document.push_str(&line);
        }
        state
    }

    /// Register a recognized record with the open batch, composing its query
    /// fragment unless it is excluded from the lookup.
    fn admit(
        &self,
        mut record: Record,
        state: &mut ScanState,
        builder: &mut QueryBuilder,
        batch: &mut Batch,
    ) {
        state.stats.total += 1;
        record.correlation_id = Some(state.stats.total as u32);
        if record.cite_key.as_deref().map_or(true, str::is_empty) {
            state.pseudo_key += 1;
            record.cite_key = Some(state.pseudo_key.to_string());
        }
        tracing::debug!(
            id = state.stats.total,
            kind = %record.kind,
            cite_key = record.cite_key_or_default(),
            "reference recognized"
        );

        // Key-value families carry their query in fields; \bibitem bodies are
        // free text and keep the derived query string.
        if record.kind != Family::Bibitem {
            let fields = extract_field_values(&self.patterns, &record.query_lines);
            record.override_query(fields);
        }

        if record.already_has_identifier {
            record.status = RecordStatus::Skipped(SkipReason::HasIdentifier);
        } else if let Err(err) = builder.push_record(&mut record) {
            tracing::warn!(error = %err, "record excluded from the batch request");
            record.status = RecordStatus::QueryError;
        }
        batch.push(record);
    }

    fn dispatch(&self, builder: &mut QueryBuilder, batch: &mut Batch, state: &mut ScanState) {
        if builder.is_empty() {
            return;
        }
        let envelope = builder.envelope();
        if self.ctx.disable_lookups {
            tracing::debug!("lookups disabled, request not sent");
            return;
        }
        state.dispatched += 1;
        tracing::debug!(batch = state.dispatched, "sending batch request");
        match self.lookup.execute(&envelope) {
            Ok(body) => match reconcile(&self.patterns, batch, &body, self.ctx.output.is_some()) {
                Ok(()) => {
                    if batch.error.is_some() {
                        state.failed += 1;
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "batch response unusable");
                    state.failed += 1;
                }
            },
            Err(err) => {
                tracing::error!(error = %err, "batch request failed");
                batch.inherit_failure(&err.to_string());
                state.failed += 1;
            }
        }
    }

    /// Drain the batch into the output buffers, finalizing each record's
    /// status and rewriting its text.
    fn write_back(&self, batch: &mut Batch, state: &mut ScanState) {
        for mut record in batch.drain() {
            if record.status == RecordStatus::Unresolved {
                record.status = if self.ctx.disable_lookups {
                    RecordStatus::Skipped(SkipReason::LookupsDisabled)
                } else {
                    RecordStatus::QueryError
                };
            }
            let key = record.cite_key_or_default().to_string();
            match &record.status {
                RecordStatus::Found { identifier, .. } => {
                    state.stats.found += 1;
                    tracing::info!("Found: {{{key}}} -> MR{identifier}");
                }
                RecordStatus::NotFound => {
                    state.stats.not_found += 1;
                    tracing::warn!("NotFound: {{{key}}}");
                }
                RecordStatus::Skipped(SkipReason::HasIdentifier) => {
                    state.stats.skipped += 1;
                    tracing::warn!("Skipping: {{{key}}} -> MR number already present");
                }
                RecordStatus::Skipped(SkipReason::LookupsDisabled) => {
                    state.stats.skipped += 1;
                    tracing::info!("Skipping: {{{key}}} -> lookups disabled");
                }
                RecordStatus::QueryError => {
                    state.stats.query_errors += 1;
                    tracing::error!("QueryError: {{{key}}}");
                }
                RecordStatus::Unresolved => {}
            }

            if let Some(syntax) = self.ctx.output {
                let label = record.label.as_deref();
                let entry = match &record.status {
                    RecordStatus::Found {
                        canonical: Some(outref),
                        ..
                    } => syntax.with_cite_key(&self.patterns, outref, &key, label),
                    _ => syntax.not_found_entry(&key, label, &record.placeholder_query()),
                };
                state.data.push_str(&entry);
            }
            state.citations.push_str(&format!("\\citation{{{key}}}\n"));

            let mut text = if self.ctx.clean_comments {
                record.content_lines.concat()
            } else {
                record.original_lines.concat()
            };
            if let RecordStatus::Found { identifier, .. } = &record.status {
                text = insert_identifier(&self.patterns, record.kind, &text, identifier);
            }
            if self.ctx.clean_comments && self.ctx.verbosity > 0 {
                text = format!("{}{text}", record.comment_lines.concat());
            }
            match self.ctx.verbosity {
                1 => text = format!("%% {}\n{text}", record.query_string()),
                2 => text = format!("%% {}\n{text}", record.status.short_label()),
                3 => {
                    text = format!(
                        "%% {}\n%% {}\n{text}",
                        record.query_string(),
                        record.status.short_label()
                    );
                }
                _ => {}
            }
            state.document.push_str(&text);
        }
    }
}
