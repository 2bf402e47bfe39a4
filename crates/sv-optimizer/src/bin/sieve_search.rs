use anyhow::Context;
use tracing::{error, info};

use sv_engine::{CommandExperiment, CommandInput};
use sv_optimizer::{PlainSearch, ProgressiveSearch, SearchFile, SearchStatus};
use sv_types::{ParameterCombination, ScoredCombination, SvResult};

/// Printed on stdout whether or not the search found a winner.
#[derive(serde::Serialize)]
struct Outcome<'a> {
    best: Option<&'a ParameterCombination>,
    error: Option<String>,
    status: &'a SearchStatus,
    results: Option<&'a [ScoredCombination]>,
}

fn report(
    best: &SvResult<ParameterCombination>,
    status: &SearchStatus,
    results: Option<&[ScoredCombination]>,
) -> anyhow::Result<()> {
    let outcome = Outcome {
        best: best.as_ref().ok(),
        error: best.as_ref().err().map(ToString::to_string),
        status,
        results,
    };
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SIEVE_CONFIG").ok())
        .context("usage: sieve-search <search.json> (or set SIEVE_CONFIG)")?;

    let file = SearchFile::load(&path).with_context(|| format!("loading {path}"))?;
    info!(
        path = %path,
        program = %file.command.program,
        data = %file.data.display(),
        candidates = ?file.scope.grid_size(),
        plain = file.plain,
        "Starting search"
    );
    let input = CommandInput::new(file.command, file.data);

    let best = if file.plain {
        let mut search: PlainSearch<CommandExperiment> =
            PlainSearch::new(input, &file.scope, file.search)?;
        let best = search.search_best();
        let results = match best {
            Ok(_) => search.evaluate().ok().map(<[ScoredCombination]>::to_vec),
            Err(_) => None,
        };
        report(&best, search.status(), results.as_deref())?;
        best
    } else {
        let mut search: ProgressiveSearch<CommandExperiment> =
            ProgressiveSearch::new(input, &file.scope, file.search)?;
        let best = search.search_best();
        report(&best, search.status(), None)?;
        best
    };

    match best {
        Ok(best) => {
            info!(best = %best, "Search finished");
            Ok(())
        }
        Err(e) => {
            error!("Search did not produce a winner: {}", e);
            Err(e.into())
        }
    }
}
