use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use getmref_core::OutputSyntax;

#[derive(Parser)]
#[command(name = "getmref")]
#[command(version)]
#[command(about = "Resolve LaTeX bibliography references against the AMS BatchMRef service \
                   and splice the returned MR numbers back into the file")]
pub struct Cli {
    /// File containing the references (.bbl, .tex or .bib).
    pub filepath: PathBuf,

    /// Source file encoding, or "auto" to detect it.
    #[arg(long, short = 'e', default_value = "auto")]
    pub enc: String,

    /// Also write the resolved references reformatted in this syntax.
    #[arg(long, short = 'f', value_enum)]
    pub format: Option<OutputFormat>,

    /// BibTeX style written to the aux file (bibtex and ims outputs only).
    #[arg(long, short = 's', default_value = "plain")]
    pub bibstyle: String,

    /// Search the whole file instead of only the bibliography environment.
    #[arg(long = "no-bib-env")]
    pub no_bib_env: bool,

    /// Drop TeX comment lines from the rewritten references.
    #[arg(long, short = 'c')]
    pub clean: bool,

    /// Maximum reference count per batch request.
    #[arg(long, default_value_t = getmref_core::ITEM_LIMIT)]
    pub item_limit: usize,

    /// Seconds to pause between batch requests.
    #[arg(long, default_value_t = 10)]
    pub wait: u64,

    /// Process everything without contacting the service.
    #[arg(long)]
    pub disable_lookups: bool,

    /// Diagnostic level; above 0 also annotates rewritten records with their
    /// query string and outcome.
    #[arg(long, short = 'd', default_value_t = 0,
          value_parser = clap::value_parser!(u8).range(0..=3))]
    pub debug: u8,
}

/// The ims syntax is bibtex with the attempted query kept for misses.
#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Tex,
    Bibtex,
    Ims,
    Amsrefs,
    Html,
}

impl From<OutputFormat> for OutputSyntax {
    fn from(value: OutputFormat) -> Self {
        match value {
            OutputFormat::Tex => OutputSyntax::Tex,
            OutputFormat::Bibtex => OutputSyntax::Bibtex,
            OutputFormat::Ims => OutputSyntax::Ims,
            OutputFormat::Amsrefs => OutputSyntax::Amsrefs,
            OutputFormat::Html => OutputSyntax::Html,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_behavior() {
        let cli = Cli::parse_from(["getmref", "refs.bbl"]);
        assert_eq!(cli.enc, "auto");
        assert!(cli.format.is_none());
        assert_eq!(cli.bibstyle, "plain");
        assert!(!cli.no_bib_env);
        assert_eq!(cli.item_limit, 100);
        assert_eq!(cli.wait, 10);
        assert_eq!(cli.debug, 0);
    }

    #[test]
    fn debug_level_is_bounded() {
        assert!(Cli::try_parse_from(["getmref", "refs.bbl", "--debug", "4"]).is_err());
        assert!(Cli::try_parse_from(["getmref", "refs.bbl", "-d", "3"]).is_ok());
    }
}
