//! Input decoding and the output file family.
//!
//! Every side file sits next to the input as `<stem>.getmref.<ext>`; the
//! rewritten document replaces the input after the pre-run state is backed
//! up to `<stem>.getmref.bak`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chardetng::EncodingDetector;
use encoding_rs::Encoding;
use getmref_core::OutputSyntax;

const GMR_SUFFIX: &str = "getmref";
const SIDE_EXTENSIONS: [&str; 4] = ["data", "bib", "aux", "html"];

pub struct DocumentFiles {
    input: PathBuf,
    base: PathBuf,
}

impl DocumentFiles {
    pub fn new(input: &Path) -> Result<Self> {
        if !input.is_file() {
            bail!("input file '{}' does not exist", input.display());
        }
        Ok(Self {
            input: input.to_path_buf(),
            base: input.with_extension(""),
        })
    }

    fn side_path(&self, ext: &str) -> PathBuf {
        PathBuf::from(format!("{}.{GMR_SUFFIX}.{ext}", self.base.display()))
    }

    /// The `\bibdata` argument: the data file path without its extension.
    pub fn data_stem(&self) -> String {
        format!("{}.{GMR_SUFFIX}", self.base.display())
    }

    /// Remove side files left over from a previous run, so a run that does
    /// not produce them cannot leave stale ones behind.
    pub fn remove_stale(&self) {
        for ext in SIDE_EXTENSIONS {
            let path = self.side_path(ext);
            if path.exists() {
                match fs::remove_file(&path) {
                    Ok(()) => tracing::debug!(path = %path.display(), "removed stale file"),
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "cannot remove stale file");
                    }
                }
            }
        }
    }

    /// Read and decode the input, keeping line ends attached to their lines.
    pub fn read_lines(&self, encoding_label: &str) -> Result<(Vec<String>, &'static Encoding)> {
        let raw = fs::read(&self.input)
            .with_context(|| format!("cannot read '{}'", self.input.display()))?;
        let encoding = resolve_encoding(encoding_label, &raw)?;
        let (text, _, had_errors) = encoding.decode(&raw);
        if had_errors {
            bail!(
                "'{}' is not valid {} text, try a different --enc value",
                self.input.display(),
                encoding.name()
            );
        }
        let lines = text.split_inclusive('\n').map(str::to_string).collect();
        Ok((lines, encoding))
    }

    /// Back up the input, then overwrite it with the rewritten document in
    /// its original encoding. An existing backup is refreshed with the
    /// current input, so it always holds the pre-run state.
    pub fn write_document(&self, document: &str, encoding: &'static Encoding) -> Result<()> {
        let backup = self.side_path("bak");
        if backup.exists() {
            fs::copy(&self.input, &backup)
                .with_context(|| format!("cannot back up '{}'", self.input.display()))?;
        } else {
            fs::rename(&self.input, &backup)
                .with_context(|| format!("cannot back up '{}'", self.input.display()))?;
        }
        tracing::debug!(path = %backup.display(), "input backed up");
        let (bytes, _, _) = encoding.encode(document);
        fs::write(&self.input, &bytes)
            .with_context(|| format!("cannot write '{}'", self.input.display()))?;
        Ok(())
    }

    /// Write the reformatted references, and the aux file when the syntax
    /// calls for one.
    pub fn write_side_outputs(
        &self,
        syntax: OutputSyntax,
        formatted: &str,
        aux: Option<&str>,
        encoding: &'static Encoding,
    ) -> Result<()> {
        let data = self.side_path(syntax.data_extension());
        let (bytes, _, _) = encoding.encode(formatted);
        fs::write(&data, &bytes)
            .with_context(|| format!("cannot write '{}'", data.display()))?;
        tracing::info!(path = %data.display(), "wrote reformatted references");

        if let Some(aux) = aux {
            let path = self.side_path("aux");
            fs::write(&path, aux)
                .with_context(|| format!("cannot write '{}'", path.display()))?;
            tracing::info!(path = %path.display(), "wrote aux file");
        }
        Ok(())
    }
}

fn resolve_encoding(label: &str, raw: &[u8]) -> Result<&'static Encoding> {
    if label.eq_ignore_ascii_case("auto") {
        let mut detector = EncodingDetector::new();
        detector.feed(raw, true);
        return Ok(detector.guess(None, true));
    }
    Encoding::for_label(label.as_bytes())
        .with_context(|| format!("unknown encoding label '{label}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_paths_share_the_stem() {
        let files = DocumentFiles {
            input: PathBuf::from("paper.bbl"),
            base: PathBuf::from("paper"),
        };
        assert_eq!(files.side_path("bib"), PathBuf::from("paper.getmref.bib"));
        assert_eq!(files.data_stem(), "paper.getmref");
    }

    #[test]
    fn explicit_encoding_labels_resolve() {
        assert_eq!(resolve_encoding("latin1", b"").unwrap().name(), "windows-1252");
        assert_eq!(resolve_encoding("utf-8", b"").unwrap().name(), "UTF-8");
        assert!(resolve_encoding("no-such-encoding", b"").is_err());
    }

    #[test]
    fn backup_always_holds_the_pre_run_state() {
        let dir = std::env::temp_dir().join(format!("getmref-files-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let input = dir.join("refs.bbl");
        let backup = dir.join("refs.getmref.bak");

        fs::write(&input, "first\n").unwrap();
        let files = DocumentFiles::new(&input).unwrap();
        files.write_document("rewritten once\n", encoding_rs::UTF_8).unwrap();
        assert_eq!(fs::read_to_string(&backup).unwrap(), "first\n");
        assert_eq!(fs::read_to_string(&input).unwrap(), "rewritten once\n");

        files.write_document("rewritten twice\n", encoding_rs::UTF_8).unwrap();
        assert_eq!(fs::read_to_string(&backup).unwrap(), "rewritten once\n");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn auto_detection_falls_back_to_something_usable() {
        let encoding = resolve_encoding("auto", b"plain ascii\n").unwrap();
        let (text, _, had_errors) = encoding.decode(b"plain ascii\n");
        assert!(!had_errors);
        assert_eq!(text, "plain ascii\n");
    }
}
