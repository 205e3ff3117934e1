mod cli;
mod files;
mod http;

use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use clap::Parser;
use getmref_core::{aux_envelope, DisabledLookup, LookupService, Pipeline, RunContext};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::files::DocumentFiles;
use crate::http::BatchMrefClient;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let started = Instant::now();
    let files = DocumentFiles::new(&cli.filepath)?;
    files.remove_stale();
    let (lines, encoding) = files.read_lines(&cli.enc)?;
    tracing::debug!(encoding = encoding.name(), lines = lines.len(), "input decoded");

    let context = RunContext {
        output: cli.format.map(Into::into),
        bibstyle: cli.bibstyle.clone(),
        require_env: !cli.no_bib_env,
        clean_comments: cli.clean,
        item_limit: cli.item_limit,
        wait: Duration::from_secs(cli.wait),
        disable_lookups: cli.disable_lookups,
        verbosity: cli.debug,
    };

    let client;
    let lookup: &dyn LookupService = if cli.disable_lookups {
        &DisabledLookup
    } else {
        client = BatchMrefClient::new(http::AMS_URL)?;
        &client
    };

    let out = Pipeline::new(&context, lookup).run(&lines);

    if out.document == lines.concat() {
        tracing::info!("document unchanged, input left in place");
    } else {
        files.write_document(&out.document, encoding)?;
    }
    if let (Some(syntax), Some(formatted)) = (context.output, out.formatted.as_deref()) {
        let aux = syntax
            .wants_aux()
            .then(|| aux_envelope(&context.bibstyle, &out.citations, &files.data_stem()));
        files.write_side_outputs(syntax, formatted, aux.as_deref(), encoding)?;
    }

    println!(
        "Total: {}, found: {}, not found: {}, query errors: {}, skipped: {}",
        out.stats.total,
        out.stats.found,
        out.stats.not_found,
        out.stats.query_errors,
        out.stats.skipped
    );
    println!("Job completed in {}s", started.elapsed().as_secs());

    if out.batches_dispatched > 0 && out.batches_failed == out.batches_dispatched {
        bail!("all {} batch requests failed", out.batches_dispatched);
    }
    Ok(())
}

fn init_logging(debug: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug == 0 { "info" } else { "debug" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
