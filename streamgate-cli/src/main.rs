mod cli;
mod config;
mod error;
mod output;
mod source;

use std::collections::HashMap;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use streamgate::{Credentials, HttpProbe, ProxyConfig, Resolution, StreamResolver};
use tokio::task::JoinSet;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::cli::{Args, Commands, OutputFormat};
use crate::config::{AppConfig, MAX_PROBE_TIMEOUT_SECS};
use crate::output::Report;
use crate::source::DocumentSource;

const EXIT_NO_STREAM: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("Application error: {e:#}");
            eprintln!("Error: {e:#}");
            1
        }
    };
    process::exit(code);
}

async fn run(args: Args) -> anyhow::Result<i32> {
    init_logging(args.verbose, args.quiet);

    let mut config =
        AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    match args.command {
        Commands::Config { show, reset } => {
            if reset {
                let path = AppConfig::reset(args.config.as_deref())?;
                println!("Configuration reset to defaults: {}", path.display());
            } else if show {
                println!("{}", config.show()?);
            } else {
                println!(
                    "Use --show to display current configuration or --reset to reset to defaults"
                );
            }
            Ok(0)
        }
        Commands::Verify {
            input,
            id,
            cookies,
            prefer,
            output,
        } => {
            if let Some(timeout) = args.timeout {
                config.probe_timeout_secs = timeout.clamp(1, MAX_PROBE_TIMEOUT_SECS);
            }
            if let Some(limit) = args.max_concurrent {
                config.max_concurrent_probes = Some(limit.max(1));
            }
            if !prefer.is_empty() {
                config.preferred_formats = prefer;
            }
            let output = output.unwrap_or(config.output_format);

            let mut probe_config = config.probe_config();
            if let Some(proxy) = args.proxy {
                let mut proxy = ProxyConfig::from_url(proxy);
                if let (Some(username), Some(password)) = (args.proxy_username, args.proxy_password)
                {
                    proxy = proxy.with_auth(username, password);
                }
                probe_config.proxy = Some(proxy);
            }

            let source = DocumentSource::read(input.as_deref())
                .await
                .context("Failed to read descriptor document")?;
            if source.is_empty() {
                anyhow::bail!("descriptor document is empty");
            }
            let identifiers: Vec<String> = match id {
                Some(id) => vec![id],
                None => source.identifiers().map(str::to_string).collect(),
            };

            let probe = HttpProbe::new(&probe_config).context("Failed to build HTTP client")?;
            let resolver = StreamResolver::new(
                Arc::new(source),
                Arc::new(probe),
                config.verifier_config(),
            );
            let credentials = cookies.as_deref().map(Credentials::from_cookie_header);

            verify(&resolver, &identifiers, credentials, &config, output).await
        }
    }
}

async fn verify(
    resolver: &StreamResolver,
    identifiers: &[String],
    credentials: Option<Credentials>,
    config: &AppConfig,
    format: OutputFormat,
) -> anyhow::Result<i32> {
    info!(
        count = identifiers.len(),
        timeout_secs = config.probe_timeout_secs,
        "Verifying media"
    );

    let mut pending = JoinSet::new();
    for identifier in identifiers {
        let handle = resolver.resolve(identifier, credentials.clone())?;
        let identifier = identifier.clone();
        pending.spawn(async move { (identifier, handle.wait().await) });
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut resolutions: HashMap<String, Resolution> = HashMap::new();
    loop {
        tokio::select! {
            _ = &mut ctrl_c, if !interrupted => {
                warn!("Interrupted, cancelling verification");
                interrupted = true;
                resolver.shutdown();
            }
            joined = pending.join_next() => match joined {
                Some(joined) => {
                    let (identifier, resolution) = joined.context("Verification task failed")?;
                    debug!(%identifier, cancelled = resolution.is_cancelled(), "Media finished");
                    resolutions.insert(identifier, resolution);
                }
                None => break,
            },
        }
    }

    let reports: Vec<Report> = identifiers
        .iter()
        .filter_map(|identifier| {
            resolutions
                .get(identifier)
                .map(|resolution| Report::new(identifier, resolution, &config.preferred_formats))
        })
        .collect();
    println!("{}", output::render(&reports, format)?);

    let code = if interrupted || resolutions.values().any(Resolution::is_cancelled) {
        EXIT_INTERRUPTED
    } else if resolutions.values().any(|r| r.error().is_some()) {
        EXIT_NO_STREAM
    } else {
        0
    };
    Ok(code)
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(verbose),
        )
        .init();
}
