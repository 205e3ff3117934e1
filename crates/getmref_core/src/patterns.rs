//! Recognition patterns for the supported reference syntaxes.
//!
//! Everything the segmentation engine and the response parser match against
//! lives here: record heads, the bibliography environment markers, the
//! `key = value` shape, existing MR numbers in all their spellings, TeX
//! noise that has to be scrubbed before a query, and the response envelope.

use regex::Regex;

/// Field-name synonyms, one entry per canonical query slot.
///
/// BatchMRef matches best when the query string presents the fields in this
/// order, so slot index doubles as ordering key.
pub const FIELD_SLOTS: [&[&str]; 8] = [
    &["author"],
    &["title", "maintitle"],
    &["journal", "journaltitle", "fjournal", "booktitle"],
    &["volume"],
    &["number", "series"],
    &["pages"],
    &["year", "date"],
    &["issn", "isrn", "isbn"],
];

/// Resolve a user-facing field name to its canonical slot index.
pub fn slot_for_key(key: &str) -> Option<usize> {
    FIELD_SLOTS
        .iter()
        .position(|synonyms| synonyms.contains(&key))
}

/// Compiled recognition patterns, built once per run.
pub struct RecordPatterns {
    /// `\begin{thebibliography}` / `\end{biblist}` and friends.
    pub bibl_env: Regex,
    /// Cheap pre-check for a `\bibitem` line.
    pub bibitem_head: Regex,
    /// Full `\bibitem[label]{key} text` structure; dot matches newline so a
    /// carried-over multi-line head can be re-tested as one string.
    pub bibitem_full: Regex,
    /// BibTeX record head `@type{key,`.
    pub bibtex_head: Regex,
    /// amsrefs record head `\bib{key}{type}{`.
    pub amsrefs_head: Regex,
    /// `key = value` line inside a record body.
    pub key_value: Regex,
    /// An MR number already present in the source, any spelling.
    pub existing_mr: Regex,
    /// Full-line TeX comment.
    pub comment_line: Regex,
    /// TeX accent around a single letter: `{\'a}`, `\'{a}`.
    pub tex_accents: Regex,
    /// Braced capitals protecting case: `{ABC}`.
    pub braced_caps: Regex,
    /// Control sequence whose argument should survive: `\bibinfo{x}{...}`.
    pub control_seq: Regex,
    /// Paragraph break (two consecutive line ends).
    pub paragraph: Regex,
    /// One or more line ends.
    pub line_ends: Regex,
    /// One `<mref_item>` fragment of a batch response.
    pub mref_item: Regex,
    /// `<batch_error>` marker of a failed batch response.
    pub batch_error: Regex,
}

impl Default for RecordPatterns {
    fn default() -> Self {
        Self {
            bibl_env: Regex::new(
                r"(?m)\s*\\(?P<envstatus>begin|end)\s*\{(thebibliography|biblist\*?)\}(.*)$",
            )
            .unwrap(),
            bibitem_head: Regex::new(r"^\s*\\bibitem").unwrap(),
            bibitem_full: Regex::new(
                r"(?s)\s*\\bibitem\s*(?P<biblabel>\[.*?\])?\s?\{(?P<citekey>.*?)\}(?P<text>.*)$",
            )
            .unwrap(),
            bibtex_head: Regex::new(r"(?m)^\s*(@\S+?)\s*\{(?P<citekey>\S+?)\s*,(?P<text>.*)$")
                .unwrap(),
            amsrefs_head: Regex::new(
                r"(?m)\\bib\s*\{(?P<citekey>.*)\}\s*\{(.*)\}\s*\{(?P<text>.*)$",
            )
            .unwrap(),
            key_value: Regex::new(r"^\s*([\w-]+)\s*=\s*(.*)").unwrap(),
            existing_mr: Regex::new(
                r"(?i)(review\s*=\s*\{\\MR\s*\{\s*[0-9]{5,10}(\s+.*?)?\}\s*\},?|(\\mr|\\mrnumber|\\bmrnumber|mrnumber|mr)(\s*=)?\s*\{(mr)?\s*[0-9]{5,10}(\s+.*?)?\s*\},?|(\{)?\s*MR(\s*|-|\})[0-9]{5,10}(\s+.*?)?\s*(\},|\}|,|.))",
            )
            .unwrap(),
            comment_line: Regex::new(r"^%.*\r?\n$").unwrap(),
            tex_accents: Regex::new(
                r#"(?:\{|)\\(?:"|'|`|\^|-|H|~|c|k|=|b|\.|d|r|u|v|A)(?:|\{)([a-zA-Z])\}(?:\}|)"#,
            )
            .unwrap(),
            braced_caps: Regex::new(r"(\s)([a-zA-Z]*)\{([A-Z]+)\}").unwrap(),
            control_seq: Regex::new(r"(\\bibinfo\{[a-z]+\}|\\[a-zA-Z]+)(\s|\{)").unwrap(),
            paragraph: Regex::new(r"(\r?\n){2}").unwrap(),
            line_ends: Regex::new(r"(\r?\n)+").unwrap(),
            mref_item: Regex::new(
                r#"(?s)<mref_item outtype="(?:bibtex|tex|amsrefs|html)">.*?</mref_item>"#,
            )
            .unwrap(),
            batch_error: Regex::new(r"(?s)<batch_error>(.*?)</batch_error>").unwrap(),
        }
    }
}

impl RecordPatterns {
    /// Strip TeX comments from one line.
    ///
    /// A full-line comment collapses to the empty string; an unescaped `%`
    /// truncates the line, keeping the line end. Lines without a final
    /// newline are left alone, matching how partial last lines are carried.
    pub fn strip_comments(&self, line: &str) -> String {
        if self.comment_line.is_match(line) {
            return String::new();
        }
        if !line.ends_with('\n') {
            return line.to_string();
        }
        let mut prev = '\0';
        for (i, c) in line.char_indices() {
            if c == '%' && prev != '\\' {
                return format!("{}\n", line[..i].trim_start());
            }
            prev = c;
        }
        line.to_string()
    }

    /// Remove TeX accents, case-protecting braces and control sequences.
    ///
    /// BatchMRef misses references when braces and accents are left in the
    /// query string, so `{\'a}` and `\'{a}` become plain `a` and `{ABC}`
    /// becomes `ABC`. Control sequences are dropped with their argument kept.
    pub fn strip_tex_syntax(&self, line: &str) -> String {
        let mut out = self.tex_accents.replace_all(line, "${1}").into_owned();
        if !out.is_empty() {
            out = self.braced_caps.replace_all(&out, "${1}${2}${3}").into_owned();
        }
        for (tex, plain) in [(r"\ndash ", "-"), (r"\ndash", "-"), (r"\&", "&"), ("\\ ", " ")] {
            out = out.replace(tex, plain);
        }
        self.control_seq.replace_all(&out, "${2}").into_owned()
    }

    /// True when the line still carries an MR number once the user-chosen
    /// cite key and label are masked out (keys routinely contain digits that
    /// would otherwise false-positive).
    pub fn has_existing_mr(
        &self,
        line: &str,
        cite_key: Option<&str>,
        label: Option<&str>,
    ) -> bool {
        let mut masked = line.to_string();
        if let Some(key) = cite_key {
            if !key.is_empty() {
                masked = masked.replace(key, "");
            }
        }
        if let Some(label) = label {
            if !label.is_empty() {
                masked = masked.replace(label, "");
            }
        }
        self.existing_mr.is_match(&masked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_resolution_covers_synonyms() {
        assert_eq!(slot_for_key("author"), Some(0));
        assert_eq!(slot_for_key("fjournal"), Some(2));
        assert_eq!(slot_for_key("date"), Some(6));
        assert_eq!(slot_for_key("isbn"), Some(7));
        assert_eq!(slot_for_key("note"), None);
    }

    #[test]
    fn full_comment_line_collapses() {
        let p = RecordPatterns::default();
        assert_eq!(p.strip_comments("% a comment\n"), "");
        assert_eq!(p.strip_comments("not a comment\n"), "not a comment\n");
    }

    #[test]
    fn inline_comment_truncates_but_escaped_percent_survives() {
        let p = RecordPatterns::default();
        assert_eq!(p.strip_comments("title = {X}, % note\n"), "title = {X}, \n");
        assert_eq!(p.strip_comments("pages = {10\\%},\n"), "pages = {10\\%},\n");
    }

    #[test]
    fn accents_and_braces_are_scrubbed() {
        let p = RecordPatterns::default();
        assert_eq!(p.strip_tex_syntax(r"P\'al Erd\H{o}s"), "Pal Erdos");
        assert_eq!(p.strip_tex_syntax(" on {ABC} rings"), " on ABC rings");
        assert_eq!(p.strip_tex_syntax(r"A \& B"), "A & B");
    }

    #[test]
    fn existing_mr_spellings_are_detected() {
        let p = RecordPatterns::default();
        assert!(p.has_existing_mr("MRNUMBER={1234567},\n", None, None));
        assert!(p.has_existing_mr("review={\\MR{1234567}},\n", None, None));
        assert!(p.has_existing_mr("\\MR{1234567}\n", None, None));
        assert!(!p.has_existing_mr("volume={12},\n", None, None));
    }

    #[test]
    fn cite_key_digits_do_not_false_positive() {
        let p = RecordPatterns::default();
        let line = "\\bibitem{MR1234567}\n";
        assert!(!p.has_existing_mr(line, Some("MR1234567"), None));
    }
}
