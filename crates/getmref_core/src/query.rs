//! Batch query composition and response reconciliation.
//!
//! A query is an XML envelope of `<mref_item>` fragments, one per record,
//! each carrying the record's query string and its correlation id. The
//! response mirrors the shape; reconciliation walks the fragments and routes
//! each outcome back to its record by id.

use crate::error::{GetmrefError, Result};
use crate::patterns::{slot_for_key, RecordPatterns};
use crate::record::{Batch, Record, RecordStatus};

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

pub const XML_HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

/// Marker page the service serves instead of a response envelope while down.
pub const SERVICE_UNAVAILABLE: &str = "The AMS Website is temporarily unavailable.";

const VALUE_TRIM: &[char] = &['\n', '\t', ' ', '"', '{', '}', ','];

/// Escape the XML-active characters; `&` first so the others stay single.
pub fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// The service only accepts ASCII; anything else becomes `?`.
pub fn to_ascii_replace(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii() { c } else { '?' })
        .collect()
}

/// Build a query string from the `key = value` fields of a record body.
///
/// Values land in canonical slots (author first, then title, journal, volume,
/// number, pages, year, identifiers) regardless of source order. The same key
/// repeated accumulates comma-separated; a synonym hitting an already filled
/// slot is dropped and ends the field context. A continuation line extends
/// the open field with a space, a line with an unrecognized key ends it.
/// Returns the empty string when no recognized field is present.
pub fn extract_field_values(patterns: &RecordPatterns, lines: &[String]) -> String {
    let mut slots: BTreeMap<usize, String> = BTreeMap::new();
    let mut current_slot: Option<usize> = None;
    let mut current_key: Option<String> = None;
    for line in lines {
        if line.trim_matches(VALUE_TRIM).is_empty() {
            continue;
        }
        match patterns.key_value.captures(line) {
            Some(caps) => {
                let key = caps[1].to_ascii_lowercase();
                match slot_for_key(&key) {
                    Some(slot) => {
                        let value = caps[2].trim_matches(VALUE_TRIM);
                        current_slot = Some(slot);
                        match slots.entry(slot) {
                            Entry::Vacant(vacant) => {
                                vacant.insert(value.to_string());
                                current_key = Some(key);
                            }
                            Entry::Occupied(mut occupied) => {
                                if current_key.as_deref() == Some(key.as_str()) {
                                    if !value.is_empty() {
                                        let entry = occupied.get_mut();
                                        if !entry.is_empty() {
                                            entry.push_str(", ");
                                        }
                                        entry.push_str(value);
                                    }
                                } else {
                                    current_slot = None;
                                    current_key = None;
                                }
                            }
                        }
                    }
                    None => {
                        current_slot = None;
                        current_key = None;
                    }
                }
            }
            None => {
                if let Some(slot) = current_slot {
                    let value = line.trim_matches(VALUE_TRIM);
                    if !value.is_empty() {
                        let entry = slots.entry(slot).or_default();
                        if !entry.is_empty() {
                            entry.push(' ');
                        }
                        entry.push_str(value);
                    }
                }
            }
        }
    }
    slots.into_values().collect::<Vec<_>>().join(", ")
}

/// Accumulates validated query fragments until the batch is dispatched.
pub struct QueryBuilder {
    outtype: &'static str,
    items: Vec<String>,
}

impl QueryBuilder {
    pub fn new(outtype: &'static str) -> Self {
        Self {
            outtype,
            items: Vec::new(),
        }
    }

    /// Compose and validate the fragment for one record.
    ///
    /// The fragment must be well-formed XML on its own; a record whose query
    /// string breaks that (stray control characters, usually) is rejected
    /// here so it cannot poison the rest of the batch.
    pub fn push_record(&mut self, record: &mut Record) -> Result<()> {
        let id = record
            .correlation_id
            .expect("record is assigned an id before submission");
        let text = escape_xml(&to_ascii_replace(&record.query_string()));
        let fragment = format!(
            "<mref_item outtype=\"{}\">\n <inref>\n  {}\n </inref>\n <myid>{}</myid>\n</mref_item>\n",
            self.outtype, text, id
        );
        roxmltree::Document::parse(&fragment).map_err(|e| GetmrefError::Validation {
            id,
            message: e.to_string(),
        })?;
        self.items.push(fragment);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The complete request envelope; resets the builder for the next batch.
    pub fn envelope(&mut self) -> String {
        let mut out = String::from(XML_HEADER);
        out.push_str("<mref_batch>\n");
        for item in self.items.drain(..) {
            out.push_str(&item);
        }
        out.push_str("</mref_batch>\n");
        out
    }
}

/// Route a batch response back onto the records of the open batch.
///
/// A failure marker (the outage page or a `<batch_error>` element) fails the
/// whole batch. Otherwise each `<mref_item>` fragment is parsed in isolation,
/// so one mangled fragment costs only its own record. With `want_canonical`
/// the service-formatted reference text is kept alongside the identifier.
pub fn reconcile(
    patterns: &RecordPatterns,
    batch: &mut Batch,
    body: &str,
    want_canonical: bool,
) -> Result<()> {
    if body.contains(SERVICE_UNAVAILABLE) {
        batch.inherit_failure(SERVICE_UNAVAILABLE);
        return Ok(());
    }
    if let Some(caps) = patterns.batch_error.captures(body) {
        batch.inherit_failure(caps[1].trim());
        return Ok(());
    }

    let mut fragments = 0usize;
    for found in patterns.mref_item.find_iter(body) {
        fragments += 1;
        let fragment = found.as_str();
        let doc = match roxmltree::Document::parse(fragment) {
            Ok(doc) => doc,
            Err(err) => {
                tracing::warn!(error = %err, "discarding unparsable response fragment");
                continue;
            }
        };
        let child_text = |name: &str| {
            doc.root_element()
                .descendants()
                .find(|n| n.has_tag_name(name))
                .and_then(|n| n.text())
                .map(str::trim)
        };

        let Some(id) = child_text("myid").and_then(|t| t.parse::<u32>().ok()) else {
            tracing::warn!("response fragment without a usable correlation id");
            continue;
        };
        let Some(record) = batch.by_id_mut(id) else {
            // Stray id from the service; nothing of ours to update.
            tracing::debug!(id, "response id matches no submitted record");
            continue;
        };
        if child_text("matches") == Some("1") {
            let Some(mrid) = child_text("mrid") else {
                tracing::warn!(id, "match without an identifier, treating as no match");
                record.status = RecordStatus::NotFound;
                continue;
            };
            let canonical = if want_canonical {
                child_text("outref").map(str::to_string)
            } else {
                None
            };
            record.set_found(mrid, canonical);
        } else {
            record.status = RecordStatus::NotFound;
        }
    }

    if fragments == 0 && !batch.is_empty() {
        batch.inherit_failure("response carried no recognizable items");
        return Err(GetmrefError::ResponseParse(
            "response carried no recognizable items".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Family;

    fn patterns() -> RecordPatterns {
        RecordPatterns::default()
    }

    fn submitted(key: &str, id: u32, query: &str) -> Record {
        let mut record = Record::new(Family::Bibtex, Some(key.into()), None);
        record.correlation_id = Some(id);
        record.override_query(query.into());
        record
    }

    #[test]
    fn fields_land_in_canonical_order() {
        let p = patterns();
        let lines: Vec<String> = [
            "  year = {1999},\n",
            "  author = {J. Smith},\n",
            "  title = {On Widgets},\n",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(
            extract_field_values(&p, &lines),
            "J. Smith, On Widgets, 1999"
        );
    }

    #[test]
    fn continuation_lines_extend_the_open_field() {
        let p = patterns();
        let lines: Vec<String> = [
            "  title = {On the theory\n",
            "           of widgets},\n",
            "  note = {irrelevant},\n",
            "  stray continuation\n",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(extract_field_values(&p, &lines), "On the theory of widgets");
    }

    #[test]
    fn repeated_key_accumulates_comma_separated() {
        let p = patterns();
        let lines: Vec<String> = ["author = {A. One},\n", "author = {B. Two},\n"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(extract_field_values(&p, &lines), "A. One, B. Two");
    }

    #[test]
    fn synonym_hitting_a_filled_slot_is_dropped() {
        let p = patterns();
        let lines: Vec<String> = [
            "journal = {J. One},\n",
            "fjournal = {Journal One},\n",
            "  dangling continuation\n",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        // The collision also ends the field context, so the continuation
        // line has nothing to extend.
        assert_eq!(extract_field_values(&p, &lines), "J. One");
    }

    #[test]
    fn fragment_shape_and_escaping() {
        let mut builder = QueryBuilder::new("tex");
        let mut record = submitted("k", 3, "Smith & Jones, <<Widgets>>, Erd\u{0151}s");
        builder.push_record(&mut record).unwrap();
        let envelope = builder.envelope();
        assert!(envelope.starts_with(XML_HEADER));
        assert!(envelope.contains(
            "<mref_item outtype=\"tex\">\n <inref>\n  Smith &amp; Jones, &lt;&lt;Widgets&gt;&gt;, Erd?s\n </inref>\n <myid>3</myid>\n</mref_item>\n"
        ));
        assert!(envelope.ends_with("</mref_batch>\n"));
        assert!(builder.is_empty());
    }

    #[test]
    fn control_characters_fail_only_their_record() {
        let mut builder = QueryBuilder::new("tex");
        let mut bad = submitted("bad", 1, "page break \u{000c} here");
        let err = builder.push_record(&mut bad).unwrap_err();
        assert!(matches!(err, GetmrefError::Validation { id: 1, .. }));
        assert!(builder.is_empty());

        let mut good = submitted("good", 2, "clean query");
        builder.push_record(&mut good).unwrap();
        assert_eq!(builder.len(), 1);
    }

    fn response_item(id: u32, matches: u32, mrid: &str, outref: &str) -> String {
        format!(
            "<mref_item outtype=\"tex\">\n <inref>q</inref>\n <myid>{id}</myid>\n \
             <matches>{matches}</matches>\n <mrid>{mrid}</mrid>\n <outref>{outref}</outref>\n</mref_item>\n"
        )
    }

    #[test]
    fn matches_route_back_by_id() {
        let p = patterns();
        let mut batch = Batch::new();
        batch.push(submitted("a", 1, "qa"));
        batch.push(submitted("b", 2, "qb"));
        let body = format!(
            "{}<mref_batch>\n{}{}</mref_batch>\n",
            XML_HEADER,
            response_item(2, 1, "MR123", "B. Author, Title."),
            response_item(1, 0, "", ""),
        );
        reconcile(&p, &mut batch, &body, true).unwrap();
        let records = batch.drain();
        assert_eq!(records[0].status, RecordStatus::NotFound);
        assert_eq!(
            records[1].status,
            RecordStatus::Found {
                identifier: "0000123".into(),
                canonical: Some("B. Author, Title.".into()),
            }
        );
    }

    #[test]
    fn unknown_correlation_id_is_discarded() {
        let p = patterns();
        let mut batch = Batch::new();
        batch.push(submitted("a", 1, "qa"));
        let body = format!(
            "{}{}{}",
            response_item(1, 0, "", ""),
            response_item(99, 1, "MR777", ""),
            "",
        );
        reconcile(&p, &mut batch, &body, false).unwrap();
        let records = batch.drain();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, RecordStatus::NotFound);
    }

    #[test]
    fn batch_error_fails_every_unresolved_record() {
        let p = patterns();
        let mut batch = Batch::new();
        batch.push(submitted("a", 1, "qa"));
        batch.push(submitted("b", 2, "qb"));
        let body = "<batch_error> quota exceeded </batch_error>";
        reconcile(&p, &mut batch, body, false).unwrap();
        assert_eq!(batch.error.as_deref(), Some("quota exceeded"));
        for record in batch.drain() {
            assert_eq!(record.status, RecordStatus::QueryError);
        }
    }

    #[test]
    fn outage_page_fails_the_batch() {
        let p = patterns();
        let mut batch = Batch::new();
        batch.push(submitted("a", 1, "qa"));
        let body = format!("<html>{SERVICE_UNAVAILABLE}</html>");
        reconcile(&p, &mut batch, &body, false).unwrap();
        assert_eq!(batch.error.as_deref(), Some(SERVICE_UNAVAILABLE));
    }

    #[test]
    fn empty_response_is_a_parse_error() {
        let p = patterns();
        let mut batch = Batch::new();
        batch.push(submitted("a", 1, "qa"));
        let err = reconcile(&p, &mut batch, "<html>splash page</html>", false).unwrap_err();
        assert!(matches!(err, GetmrefError::ResponseParse(_)));
        assert_eq!(batch.drain()[0].status, RecordStatus::QueryError);
    }
}
