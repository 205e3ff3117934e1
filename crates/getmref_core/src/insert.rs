//! Splicing MR numbers into source text and rendering the optional
//! reformatted output.

use crate::patterns::RecordPatterns;
use crate::record::Family;

const HEAD_TRIM: &[char] = &['\n', '\t', ' ', ','];

/// Splice an MR number into a reference, spelled for its syntax family.
///
/// The number goes right before the family closing token. When the token is
/// absent (a `\bibitem` without `\endbibitem`, typically) the first paragraph
/// break stands in for it, and failing that the number is appended at the
/// end. Families without a closing token get their line runs collapsed and
/// the number appended.
pub fn insert_identifier(
    patterns: &RecordPatterns,
    kind: Family,
    text: &str,
    mrid: &str,
) -> String {
    let mut mr_string = kind.identifier_line(mrid);
    let Some(token) = kind.closing_token() else {
        let collapsed = patterns.line_ends.replace_all(text, "\n");
        return format!("{collapsed}{mr_string}");
    };

    let ending = match text.rfind(token) {
        Some(idx) => Some(idx),
        None => patterns.paragraph.find(text).map(|m| {
            mr_string.push('\n');
            m.start()
        }),
    };
    match ending {
        Some(idx) => format!(
            "{}{}{}",
            text[..idx].trim_matches(HEAD_TRIM),
            mr_string,
            text[idx..].trim_start()
        ),
        None => format!("{}{}\n", text.trim(), mr_string),
    }
}

/// The output syntaxes a run can be asked to reformat references into.
///
/// `Ims` is the bibtex spelling with a different placeholder for misses; the
/// service itself only knows the other four.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSyntax {
    Tex,
    Bibtex,
    Ims,
    Amsrefs,
    Html,
}

impl OutputSyntax {
    /// The `outtype` attribute the service expects for this syntax.
    pub fn query_outtype(self) -> &'static str {
        match self {
            OutputSyntax::Tex => "tex",
            OutputSyntax::Bibtex | OutputSyntax::Ims => "bibtex",
            OutputSyntax::Amsrefs => "amsrefs",
            OutputSyntax::Html => "html",
        }
    }

    /// Extension of the side file carrying the reformatted references.
    pub fn data_extension(self) -> &'static str {
        match self {
            OutputSyntax::Bibtex | OutputSyntax::Ims => "bib",
            OutputSyntax::Html => "html",
            OutputSyntax::Tex | OutputSyntax::Amsrefs => "data",
        }
    }

    /// Whether the syntax also needs a BibTeX aux file next to the data file.
    pub fn wants_aux(self) -> bool {
        matches!(self, OutputSyntax::Bibtex | OutputSyntax::Ims)
    }

    /// Entry for a reference the service did not match.
    ///
    /// `Ims` carries the attempted query string so the miss can be retried by
    /// hand; the others carry a fixed marker.
    pub fn not_found_entry(self, cite_key: &str, label: Option<&str>, query: &str) -> String {
        match self {
            OutputSyntax::Tex => format!(
                "\\bibitem{}{{{cite_key}}}\n   Not Found!\n\n",
                label.unwrap_or("")
            ),
            OutputSyntax::Bibtex => {
                format!("@MISC {{{cite_key},\n   NOTE = {{Not Found!}}\n}}\n\n")
            }
            OutputSyntax::Ims => {
                format!("@MISC {{{cite_key},\n   HOWPUBLISHED = {{{query}}},\n}}\n\n")
            }
            OutputSyntax::Amsrefs => {
                format!("\\bib{{{cite_key}}}{{misc}}{{\n    note = {{Not Found!}}\n}}\n\n")
            }
            OutputSyntax::Html => {
                format!("<!-- {cite_key} -->\nNot Found!\n<br/><br/>\n\n")
            }
        }
    }

    /// Put the source document's cite key (and label) onto a reference the
    /// service returned, so the reformatted entry stays citable under the
    /// original key.
    pub fn with_cite_key(
        self,
        patterns: &RecordPatterns,
        outref: &str,
        cite_key: &str,
        label: Option<&str>,
    ) -> String {
        let body = format!("{}\n\n", outref.trim());
        match self {
            OutputSyntax::Tex => format!(
                "\\bibitem{}{{{cite_key}}}\n{body}",
                label.unwrap_or("")
            ),
            OutputSyntax::Bibtex | OutputSyntax::Ims => patterns
                .bibtex_head
                .replace(&body, |caps: &regex::Captures| {
                    format!(
                        "{} {{{cite_key},{}",
                        &caps[1],
                        caps.name("text").map_or("", |m| m.as_str())
                    )
                })
                .into_owned(),
            OutputSyntax::Amsrefs => patterns
                .amsrefs_head
                .replace(&body, |caps: &regex::Captures| {
                    format!(
                        "\\bib{{{cite_key}}}{{{}}}{{{}",
                        &caps[2],
                        caps.name("text").map_or("", |m| m.as_str())
                    )
                })
                .into_owned(),
            OutputSyntax::Html => format!("<!-- {cite_key} -->\n{body}<br/><br/>\n"),
        }
    }

    /// Wrap the concatenated entries into the document shape of the syntax.
    /// BibTeX files are flat, so `Bibtex` and `Ims` pass the body through.
    pub fn document_envelope(self, refcount: usize, body: &str) -> String {
        match self {
            OutputSyntax::Tex => format!(
                "\\begin{{thebibliography}}{{{refcount}}}\n\
                 \\csname bibmessage\\endcsname\n\n\
                 {body}\\end{{thebibliography}}\n"
            ),
            OutputSyntax::Amsrefs => format!(
                "\\begin{{bibdiv}}\n\\begin{{biblist}}\n\n{body}\\end{{biblist}}\n\\end{{bibdiv}}"
            ),
            OutputSyntax::Html => {
                format!("<!DOCTYPE html>\n<html>\n<body>\n\n{body}\n</body>\n</html>\n")
            }
            OutputSyntax::Bibtex | OutputSyntax::Ims => body.to_string(),
        }
    }
}

/// Aux file content tying the reformatted bibliography into a LaTeX run.
pub fn aux_envelope(bibstyle: &str, citations: &str, data_stem: &str) -> String {
    format!("\\bibstyle{{{bibstyle}}}\n{citations}\\bibdata{{{data_stem}}}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns() -> RecordPatterns {
        RecordPatterns::default()
    }

    #[test]
    fn bibtex_number_lands_before_the_closing_brace() {
        let text = "@article{k,\n title={T},\n}\n";
        let out = insert_identifier(&patterns(), Family::Bibtex, text, "0000123");
        assert_eq!(out, "@article{k,\n title={T},\nMRNUMBER={0000123},\n}\n");
    }

    #[test]
    fn amsrefs_number_is_a_review_field() {
        let text = "\\bib{k}{article}{\n author={A},\n}\n";
        let out = insert_identifier(&patterns(), Family::Amsrefs, text, "1234567");
        assert_eq!(
            out,
            "\\bib{k}{article}{\n author={A},\nreview={\\MR{1234567}},\n}\n"
        );
    }

    #[test]
    fn bibitem_without_end_token_uses_the_paragraph_break() {
        let text = "\\bibitem{k}\nSome text.\n\n";
        let out = insert_identifier(&patterns(), Family::Bibitem, text, "0000123");
        assert_eq!(out, "\\bibitem{k}\nSome text.\n\\MR{0000123}\n\n");
    }

    #[test]
    fn bibitem_with_end_token_keeps_it_last() {
        let text = "\\bibitem{k}\nSome text.\n\\endbibitem\n";
        let out = insert_identifier(&patterns(), Family::Bibitem, text, "0000123");
        assert_eq!(out, "\\bibitem{k}\nSome text.\n\\MR{0000123}\n\\endbibitem\n");
    }

    #[test]
    fn tex_reference_gets_the_number_appended() {
        let text = "A. Author, Title.\n\n";
        let out = insert_identifier(&patterns(), Family::Tex, text, "0000123");
        assert_eq!(out, "A. Author, Title.\n\\MR{0000123}\n\n");
    }

    #[test]
    fn reference_without_any_anchor_gets_the_number_at_the_end() {
        let text = "\\bibitem{k} all on one trailing line";
        let out = insert_identifier(&patterns(), Family::Bibitem, text, "0000123");
        assert_eq!(out, "\\bibitem{k} all on one trailing line\n\\MR{0000123}\n\n");
    }

    #[test]
    fn not_found_placeholder_uses_the_source_cite_key() {
        let entry = OutputSyntax::Bibtex.not_found_entry("foo", None, "");
        assert_eq!(entry, "@MISC {foo,\n   NOTE = {Not Found!}\n}\n\n");

        let entry = OutputSyntax::Ims.not_found_entry("foo", None, "A. Author, Title, 1999");
        assert_eq!(
            entry,
            "@MISC {foo,\n   HOWPUBLISHED = {A. Author, Title, 1999},\n}\n\n"
        );

        let entry = OutputSyntax::Tex.not_found_entry("foo", Some("[F]"), "");
        assert_eq!(entry, "\\bibitem[F]{foo}\n   Not Found!\n\n");

        let entry = OutputSyntax::Amsrefs.not_found_entry("foo", None, "");
        assert_eq!(entry, "\\bib{foo}{misc}{\n    note = {Not Found!}\n}\n\n");

        let entry = OutputSyntax::Html.not_found_entry("foo", None, "");
        assert_eq!(entry, "<!-- foo -->\nNot Found!\n<br/><br/>\n\n");
    }

    #[test]
    fn cite_key_replaces_the_service_key_in_bibtex() {
        let outref = "@article {MR1234567,\n AUTHOR = {A},\n}";
        let out = OutputSyntax::Bibtex.with_cite_key(&patterns(), outref, "foo", None);
        assert_eq!(out, "@article {foo,\n AUTHOR = {A},\n}\n\n");
    }

    #[test]
    fn cite_key_replaces_the_service_key_in_amsrefs() {
        let outref = "\\bib{MR1234567}{article}{\n author={A},\n}";
        let out = OutputSyntax::Amsrefs.with_cite_key(&patterns(), outref, "foo", None);
        assert_eq!(out, "\\bib{foo}{article}{\n author={A},\n}\n\n");
    }

    #[test]
    fn tex_entry_carries_the_label() {
        let out = OutputSyntax::Tex.with_cite_key(&patterns(), "A. Author, Title.", "k", Some("[AA]"));
        assert_eq!(out, "\\bibitem[AA]{k}\nA. Author, Title.\n\n");
    }

    #[test]
    fn envelopes_wrap_the_body() {
        let tex = OutputSyntax::Tex.document_envelope(2, "entries\n");
        assert!(tex.starts_with("\\begin{thebibliography}{2}\n"));
        assert!(tex.ends_with("entries\n\\end{thebibliography}\n"));

        let flat = OutputSyntax::Bibtex.document_envelope(2, "entries\n");
        assert_eq!(flat, "entries\n");

        let aux = aux_envelope("plain", "\\citation{a}\n", "paper.getmref");
        assert_eq!(aux, "\\bibstyle{plain}\n\\citation{a}\n\\bibdata{paper.getmref}");
    }
}
