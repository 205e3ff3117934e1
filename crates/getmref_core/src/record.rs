//! In-memory model of one extracted reference and of a working batch.

use std::fmt;

/// Reference syntax families.
///
/// `Bibitem`, `Bibtex` and `Amsrefs` are recognized in the input; `Tex` is
/// plain LaTeX without any delimiters, used only for references that already
/// arrive formatted (it is a valid insertion target but never a segmentation
/// product).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Bibitem,
    Bibtex,
    Amsrefs,
    Tex,
}

impl Family {
    /// Typical closing token for the family, used to locate the insertion
    /// point for an MR number.
    pub fn closing_token(self) -> Option<&'static str> {
        match self {
            Family::Bibtex | Family::Amsrefs => Some("}"),
            Family::Bibitem => Some("\\endbibitem"),
            Family::Tex => None,
        }
    }

    /// MR number in the family's own spelling, ready to splice in.
    pub fn identifier_line(self, mrid: &str) -> String {
        match self {
            Family::Bibtex => format!(",\nMRNUMBER={{{mrid}}},\n"),
            Family::Amsrefs => format!(",\nreview={{\\MR{{{mrid}}}}},\n"),
            Family::Bibitem => format!("\n\\MR{{{mrid}}}\n"),
            Family::Tex => format!("\\MR{{{mrid}}}\n\n"),
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Family::Bibitem => "bibitem",
            Family::Bibtex => "bibtex",
            Family::Amsrefs => "amsrefs",
            Family::Tex => "tex",
        };
        write!(f, "{name}")
    }
}

/// Why a record was excluded from the lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The source already carries an MR number.
    HasIdentifier,
    /// Lookups were disabled for the whole run.
    LookupsDisabled,
}

/// Outcome of the lookup round-trip for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordStatus {
    Unresolved,
    Found {
        identifier: String,
        canonical: Option<String>,
    },
    NotFound,
    Skipped(SkipReason),
    QueryError,
}

impl RecordStatus {
    pub fn short_label(&self) -> &'static str {
        match self {
            RecordStatus::Unresolved => "unresolved",
            RecordStatus::Found { .. } => "found",
            RecordStatus::NotFound => "not-found",
            RecordStatus::Skipped(_) => "skipped",
            RecordStatus::QueryError => "query-error",
        }
    }
}

fn normalize_lines(lines: &[String], closing_token: Option<&str>) -> String {
    let joined = lines.concat();
    let collapsed = joined.split_whitespace().collect::<Vec<_>>().join(" ");
    match closing_token {
        Some(token) => match collapsed.rfind(token) {
            Some(idx) => collapsed[..idx].trim().to_string(),
            None => collapsed,
        },
        None => collapsed,
    }
}

/// Strip the `MR` prefix and left-pad to the canonical seven digits.
pub fn normalize_identifier(raw: &str) -> String {
    let digits = raw.trim().trim_start_matches(['M', 'R']);
    format!("{digits:0>7}")
}

/// One bibliography reference occurrence.
///
/// `original_lines` concatenated reproduce the source span byte for byte;
/// `content_lines` and `query_lines` run parallel to it line for line, with
/// empty entries standing in for full-comment lines.
#[derive(Debug, Clone)]
pub struct Record {
    pub kind: Family,
    pub correlation_id: Option<u32>,
    pub cite_key: Option<String>,
    pub label: Option<String>,
    pub original_lines: Vec<String>,
    pub content_lines: Vec<String>,
    pub query_lines: Vec<String>,
    pub comment_lines: Vec<String>,
    pub already_has_identifier: bool,
    pub status: RecordStatus,
    query_override: Option<String>,
    derived_query: Option<String>,
}

impl Record {
    pub fn new(kind: Family, cite_key: Option<String>, label: Option<String>) -> Self {
        Self {
            kind,
            correlation_id: None,
            cite_key,
            label,
            original_lines: Vec::new(),
            content_lines: Vec::new(),
            query_lines: Vec::new(),
            comment_lines: Vec::new(),
            already_has_identifier: false,
            status: RecordStatus::Unresolved,
            query_override: None,
            derived_query: None,
        }
    }

    /// Append one source line with its comment-stripped and query-safe forms.
    pub fn push_content_line(&mut self, original: String, content: String, query: String) {
        self.original_lines.push(original);
        self.content_lines.push(content);
        self.query_lines.push(query);
    }

    /// Append a full-comment line; it stays in the verbatim text and in the
    /// comment list, with empty placeholders keeping the parallel lists in
    /// step.
    pub fn push_comment_line(&mut self, original: String) {
        self.comment_lines.push(original.clone());
        self.original_lines.push(original);
        self.content_lines.push(String::new());
        self.query_lines.push(String::new());
    }

    pub fn cite_key_or_default(&self) -> &str {
        self.cite_key.as_deref().unwrap_or("")
    }

    /// The query string for this record.
    ///
    /// Derived lazily from the query-safe lines; an explicit override (set
    /// by key-value field extraction) is authoritative and never recomputed.
    pub fn query_string(&mut self) -> String {
        if let Some(q) = &self.query_override {
            return q.clone();
        }
        if self.derived_query.is_none() {
            self.derived_query = Some(self.normalized_body());
        }
        self.derived_query.clone().unwrap_or_default()
    }

    pub fn override_query(&mut self, query: String) {
        self.query_override = Some(query);
    }

    /// Whitespace-collapsed record body with the family closing token, if
    /// any, cut off.
    fn normalized_body(&self) -> String {
        normalize_lines(&self.query_lines, self.kind.closing_token())
    }

    /// Record body without its head line, normalized the same way as the
    /// query string. Used where a miss has to be described to the reader.
    pub fn placeholder_query(&self) -> String {
        let tail = self.content_lines.get(1..).unwrap_or_default();
        normalize_lines(tail, self.kind.closing_token())
    }

    /// Record a lookup match, normalizing the returned identifier.
    pub fn set_found(&mut self, raw_identifier: &str, canonical: Option<String>) {
        self.status = RecordStatus::Found {
            identifier: normalize_identifier(raw_identifier),
            canonical,
        };
    }
}

/// The bounded working set of records between submission and reconciliation.
///
/// Exactly one batch is open at a time; it is drained completely before the
/// next one opens.
#[derive(Debug, Default)]
pub struct Batch {
    records: Vec<Record>,
    /// Batch-level failure description; individual unresolved members
    /// inherit it as a query error.
    pub error: Option<String>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn by_id_mut(&mut self, correlation_id: u32) -> Option<&mut Record> {
        self.records
            .iter_mut()
            .find(|r| r.correlation_id == Some(correlation_id))
    }

    /// Mark every record still awaiting a response as a query error.
    pub fn inherit_failure(&mut self, reason: &str) {
        self.error = Some(reason.to_string());
        for record in &mut self.records {
            if record.status == RecordStatus::Unresolved && !record.already_has_identifier {
                record.status = RecordStatus::QueryError;
            }
        }
    }

    pub fn drain(&mut self) -> Vec<Record> {
        self.error = None;
        std::mem::take(&mut self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_is_stripped_and_zero_padded() {
        assert_eq!(normalize_identifier("MR123"), "0000123");
        assert_eq!(normalize_identifier("1234567"), "1234567");
        assert_eq!(normalize_identifier(" MR1234567 "), "1234567");
    }

    #[test]
    fn query_override_is_authoritative() {
        let mut record = Record::new(Family::Bibtex, Some("k".into()), None);
        record.push_content_line(
            "@article{k,\n".into(),
            "@article{k,\n".into(),
            "\n".into(),
        );
        record.override_query("author, title".into());
        assert_eq!(record.query_string(), "author, title");
    }

    #[test]
    fn derived_query_collapses_whitespace_and_cuts_closing_token() {
        let mut record = Record::new(Family::Bibitem, Some("k".into()), None);
        record.push_content_line("x\n".into(), "x\n".into(), "J. Smith,\n".into());
        record.push_content_line(
            "y\n".into(),
            "y\n".into(),
            "  On   Widgets\n".into(),
        );
        record.push_content_line(
            "\\endbibitem\n".into(),
            "\\endbibitem\n".into(),
            "\\endbibitem\n".into(),
        );
        assert_eq!(record.query_string(), "J. Smith, On Widgets");
    }

    #[test]
    fn batch_failure_spares_skipped_records() {
        let mut batch = Batch::new();
        let mut submitted = Record::new(Family::Bibtex, Some("a".into()), None);
        submitted.correlation_id = Some(1);
        batch.push(submitted);
        let mut skipped = Record::new(Family::Bibtex, Some("b".into()), None);
        skipped.status = RecordStatus::Skipped(SkipReason::HasIdentifier);
        batch.push(skipped);

        batch.inherit_failure("transport down");
        let records = batch.drain();
        assert_eq!(records[0].status, RecordStatus::QueryError);
        assert_eq!(
            records[1].status,
            RecordStatus::Skipped(SkipReason::HasIdentifier)
        );
    }
}
