//! Pool worker entry point.
//!
//! Spawned by the gateway's worker pool. Constructs one model from the
//! compiled-in registry and serves newline-delimited JSON requests on
//! stdin/stdout until EOF or a shutdown request. Stdout is reserved for the
//! protocol; all diagnostics go to stderr.

use anyhow::{Context, bail};
use figmentator::SuggestionType;
use figmentator::figment::pool::run_worker;
use figmentator::figment::registry::PluginRegistry;
use tracing_subscriber::EnvFilter;

struct Args {
    suggestion_type: SuggestionType,
    plugin: String,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut suggestion_type = None;
    let mut plugin = None;

    let mut args = std::env::args().skip(1);
    while let Some(flag) = args.next() {
        match flag.as_str() {
            "--suggestion-type" => {
                let value = args.next().context("--suggestion-type needs a value")?;
                suggestion_type = Some(value.parse()?);
            }
            "--plugin" => {
                plugin = Some(args.next().context("--plugin needs a value")?);
            }
            other => bail!("unknown argument `{other}`"),
        }
    }

    Ok(Args {
        suggestion_type: suggestion_type.context("missing --suggestion-type")?,
        plugin: plugin.context("missing --plugin")?,
    })
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    let registry = PluginRegistry::builtin();
    run_worker(&registry, args.suggestion_type, &args.plugin)
        .context("worker request loop failed")?;
    Ok(())
}
