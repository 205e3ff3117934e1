//! Streaming segmentation of a document into reference records and
//! pass-through text.
//!
//! The engine walks input lines once, tracking whether it is inside a
//! bibliography environment and whether boundary recognition is active,
//! and emits complete records interleaved with the text around them.
//! Everything it does not claim as a record passes through verbatim, so
//! reassembling the segment stream reproduces the document byte for byte.

use std::collections::VecDeque;
use std::mem;

use crate::patterns::RecordPatterns;
use crate::record::{Family, Record};

/// One item of the segmentation stream.
#[derive(Debug)]
pub enum Segment {
    /// A complete reference record.
    Record(Record),
    /// A recognized `\begin{thebibliography}`/`\begin{biblist}` line.
    EnvBegin(String),
    /// The matching `\end{...}` line.
    EnvEnd(String),
    /// A line outside any record, passed through untouched.
    Passthrough(String),
    /// End of input, carrying any trailing text that still has to be
    /// re-emitted verbatim.
    Eof(String),
}

enum Boundary {
    Env {
        begin: bool,
    },
    Start {
        family: Family,
        cite_key: Option<String>,
        label: Option<String>,
        text: String,
    },
    /// A `\bibitem` head whose full structure continues on the next line;
    /// the current line is held over and merged with the next one.
    Partial,
}

pub struct Segmenter<'a, I> {
    lines: I,
    patterns: &'a RecordPatterns,
    require_env: bool,
    /// Inside a region where records should be captured.
    gathering: bool,
    /// Boundary recognition active; switched off past the environment end.
    searching: bool,
    /// Held-over partial `\bibitem` head awaiting its continuation.
    carry: String,
    current: Option<Record>,
    /// Comment block cut off the previous record, waiting for the record
    /// that it textually precedes.
    pending_original: Vec<String>,
    pending_comments: Vec<String>,
    queue: VecDeque<Segment>,
    done: bool,
}

impl<'a, I> Segmenter<'a, I>
where
    I: Iterator<Item = String>,
{
    pub fn new(lines: I, patterns: &'a RecordPatterns, require_env: bool) -> Self {
        Self {
            lines,
            patterns,
            require_env,
            gathering: !require_env,
            searching: true,
            carry: String::new(),
            current: None,
            pending_original: Vec::new(),
            pending_comments: Vec::new(),
            queue: VecDeque::new(),
            done: false,
        }
    }

    fn find_boundary(&self, clean: &str) -> Option<Boundary> {
        // The bibitem recognizer is two-phase: a cheap head check first,
        // then the full structure, which may span lines.
        if self.patterns.bibitem_head.is_match(clean) {
            return Some(match self.patterns.bibitem_full.captures(clean) {
                Some(caps) => Boundary::Start {
                    family: Family::Bibitem,
                    cite_key: caps.name("citekey").map(|m| m.as_str().to_string()),
                    label: caps.name("biblabel").map(|m| m.as_str().to_string()),
                    text: caps
                        .name("text")
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default(),
                },
                None => Boundary::Partial,
            });
        }
        if self.require_env {
            if let Some(caps) = self.patterns.bibl_env.captures(clean) {
                return Some(Boundary::Env {
                    begin: &caps["envstatus"] == "begin",
                });
            }
        }
        if let Some(caps) = self.patterns.bibtex_head.captures(clean) {
            if !caps[1].eq_ignore_ascii_case("@preamble") {
                return Some(Boundary::Start {
                    family: Family::Bibtex,
                    cite_key: caps.name("citekey").map(|m| m.as_str().to_string()),
                    label: None,
                    text: caps
                        .name("text")
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default(),
                });
            }
            return None;
        }
        if let Some(caps) = self.patterns.amsrefs_head.captures(clean) {
            return Some(Boundary::Start {
                family: Family::Amsrefs,
                cite_key: caps.name("citekey").map(|m| m.as_str().to_string()),
                label: None,
                text: caps
                    .name("text")
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
            });
        }
        None
    }

    /// Close the open record, reassigning the trailing comment block to the
    /// record that follows, and queue it for emission.
    fn seal_current(&mut self) {
        if let Some(mut record) = self.current.take() {
            let original = mem::take(&mut record.original_lines);
            let comments = mem::take(&mut record.comment_lines);
            let (original, comments, next_original, next_comments) =
                reattach_boundary_comments(original, comments);
            record.original_lines = original;
            record.comment_lines = comments;
            // The moved lines sit at the tail and have empty placeholders in
            // the parallel lists, so truncating keeps the lists in step.
            record.content_lines.truncate(record.original_lines.len());
            record.query_lines.truncate(record.original_lines.len());
            self.pending_original = next_original;
            self.pending_comments = next_comments;
            self.queue.push_back(Segment::Record(record));
        }
    }

    /// Re-emit a pending comment block that no following record claimed.
    fn flush_pending(&mut self) {
        for line in self.pending_original.drain(..) {
            self.queue.push_back(Segment::Passthrough(line));
        }
        self.pending_comments.clear();
    }

    fn start_record(
        &mut self,
        family: Family,
        cite_key: Option<String>,
        label: Option<String>,
        text: String,
        line: String,
        clean: String,
    ) {
        let mut record = Record::new(family, cite_key, label);
        for original in self.pending_original.drain(..) {
            record.original_lines.push(original);
            record.content_lines.push(String::new());
            record.query_lines.push(String::new());
        }
        record.comment_lines = mem::take(&mut self.pending_comments);

        let key = record.cite_key.as_deref();
        let label_ref = record.label.as_deref();
        if self.patterns.has_existing_mr(&clean, key, label_ref)
            || self.patterns.has_existing_mr(&text, key, label_ref)
        {
            record.already_has_identifier = true;
        }
        // The query line starts from the family-syntax-free text so the cite
        // key and label cannot mislead the lookup.
        let query = self.patterns.strip_tex_syntax(&text);
        record.push_content_line(line, clean, query);
        self.current = Some(record);
    }

    fn feed(&mut self, raw: String) {
        let line = if self.carry.is_empty() {
            raw
        } else {
            format!("{}{}", mem::take(&mut self.carry), raw)
        };
        let clean = self.patterns.strip_comments(&line);

        if clean.is_empty() {
            // Full comment line: part of the open record's verbatim text,
            // plain pass-through otherwise.
            match &mut self.current {
                Some(record) => record.push_comment_line(line),
                None => self.queue.push_back(Segment::Passthrough(line)),
            }
            return;
        }

        let boundary = if self.searching {
            self.find_boundary(&clean)
        } else {
            None
        };

        match boundary {
            Some(Boundary::Env { begin }) => {
                self.seal_current();
                self.flush_pending();
                self.gathering = begin;
                self.searching = begin;
                self.queue.push_back(if begin {
                    Segment::EnvBegin(line)
                } else {
                    Segment::EnvEnd(line)
                });
            }
            Some(Boundary::Partial) => {
                self.carry = line;
            }
            Some(Boundary::Start {
                family,
                cite_key,
                label,
                text,
            }) => {
                self.seal_current();
                if self.gathering {
                    self.start_record(family, cite_key, label, text, line, clean);
                } else {
                    // Outside the region of interest the record is dropped,
                    // but its text still belongs to the document.
                    self.flush_pending();
                    self.queue.push_back(Segment::Passthrough(line));
                }
            }
            None => {
                if !self.gathering || self.current.is_none() {
                    self.flush_pending();
                    self.queue.push_back(Segment::Passthrough(line));
                    return;
                }
                if let Some(record) = self.current.as_mut() {
                    let key = record.cite_key.clone();
                    let label = record.label.clone();
                    if self
                        .patterns
                        .has_existing_mr(&clean, key.as_deref(), label.as_deref())
                    {
                        record.already_has_identifier = true;
                    }
                    let query = self.patterns.strip_tex_syntax(&clean);
                    record.push_content_line(line, clean, query);
                }
            }
        }
    }

    fn finish(&mut self) {
        if !self.carry.is_empty() {
            // A suspected record head that never completed is ordinary text.
            let line = mem::take(&mut self.carry);
            let clean = self.patterns.strip_comments(&line);
            match &mut self.current {
                Some(record) => {
                    let query = self.patterns.strip_tex_syntax(&clean);
                    record.push_content_line(line, clean, query);
                }
                None => self.queue.push_back(Segment::Passthrough(line)),
            }
        }
        self.seal_current();
        let tail: String = self.pending_original.drain(..).collect();
        self.pending_comments.clear();
        self.queue.push_back(Segment::Eof(tail));
        self.done = true;
    }
}

impl<I> Iterator for Segmenter<'_, I>
where
    I: Iterator<Item = String>,
{
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        loop {
            if let Some(segment) = self.queue.pop_front() {
                return Some(segment);
            }
            if self.done {
                return None;
            }
            match self.lines.next() {
                Some(line) => self.feed(line),
                None => self.finish(),
            }
        }
    }
}

/// Reassign the comment block trailing a sealed record to the record that
/// follows it.
///
/// Comments are typically written as a header for the citation they precede,
/// so the walk starts at the record's last line, steps over blank lines, and
/// moves contiguous comment lines (with any blanks between them) to the next
/// record. It stops at the first real content line; trailing blanks with no
/// comment above them stay where they are.
///
/// Returns `(record original, record comments, moved original, moved
/// comments)`, each in source order.
pub fn reattach_boundary_comments(
    mut original: Vec<String>,
    mut comments: Vec<String>,
) -> (Vec<String>, Vec<String>, Vec<String>, Vec<String>) {
    let mut next_original = Vec::new();
    let mut next_comments = Vec::new();
    let mut skip = 0usize;
    loop {
        let Some(pos) = original.len().checked_sub(skip + 1) else {
            break;
        };
        let line = &original[pos];
        if line.trim().is_empty() {
            skip += 1;
            continue;
        }
        if comments.last() == Some(line) {
            next_comments.push(comments.pop().expect("non-empty"));
            for _ in 0..skip {
                next_original.push(original.pop().expect("non-empty"));
            }
            skip = 0;
            next_original.push(original.pop().expect("non-empty"));
        } else {
            break;
        }
    }
    next_original.reverse();
    next_comments.reverse();
    (original, comments, next_original, next_comments)
}
