use anyhow::{bail, Context};
use clap::Parser;
use futures::StreamExt;
use libhead_storm::{apply_tld_filters, create_http_pool, LinkTemplate, Prober, RepeatPolicy, Renderer};
use serde::Serialize;
use std::{
    io::{self, Write},
    net::SocketAddr,
    path::PathBuf,
    time::Duration,
};
use tracing::info;

mod config;
mod logging;
mod server;

use config::{CliOverrides, Config};
use server::AppState;

#[derive(Parser, Debug)]
#[command(name = "tldq")]
#[command(version)]
#[command(about = "Live TLD probe - stream which TLDs of a name answer over HTTP", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address to serve the page and the /ask socket on
    #[arg(short = 'b', long)]
    bind: Option<String>,

    /// TLD list file, or "iana" to download the IANA list
    #[arg(long, value_name = "PATH|iana")]
    tlds: Option<String>,

    /// File with a {link} placeholder used to render each live result
    #[arg(long, value_name = "FILE")]
    template: Option<PathBuf>,

    /// HEAD request timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// What to do with a label identical to the previous one (skip, rerun)
    #[arg(long)]
    repeat_policy: Option<RepeatPolicy>,

    /// Log level filter (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Probe LABEL once, print every outcome as NDJSON and exit
    #[arg(long, short = 'j', value_name = "LABEL")]
    ndjson: Option<String>,

    /// Print the default config to stdout and exit
    #[arg(long)]
    print_default_config: bool,

    /// Write the default config to the config path and exit
    #[arg(long)]
    write_default_config: bool,
}

#[derive(Debug, Serialize)]
struct NdjsonLine<'a> {
    query: &'a str,
    domain: &'a str,
    valid: bool,
    display: &'a str,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_default_config {
        println!("{}", config::default_config_toml());
        return Ok(());
    }

    if args.write_default_config {
        let Some(path) = config::config_path() else {
            bail!("Could not determine config path");
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, config::default_config_toml())?;
        println!("Default config written to: {}", path.display());
        return Ok(());
    }

    let mut config = config::load_config(args.config.as_deref())?;
    config.apply_overrides(CliOverrides {
        bind: args.bind,
        tlds: args.tlds,
        template: args.template,
        timeout_secs: args.timeout,
        repeat_policy: args.repeat_policy,
    });

    logging::init_logging(args.log_level.as_deref());

    info!("Starting tldq v{}", env!("CARGO_PKG_VERSION"));

    let tlds = load_tlds(&config).await?;
    let render = load_renderer(&config)?;
    let prober = Prober::new(&config.probe_config(), tlds, render).context("Failed to build HTTP client")?;

    if let Some(label) = args.ndjson {
        return run_ndjson(&prober, &label).await;
    }

    let bind_addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind))?;

    let state = AppState {
        prober,
        repeat_policy: config.probe.repeat_policy,
    };
    server::start_web_server(bind_addr, state).await
}

async fn load_tlds(config: &Config) -> anyhow::Result<Vec<String>> {
    let source = config.tld_source();
    let client = create_http_pool(Duration::from_secs(30))?;

    let tlds = source
        .load(&client)
        .await
        .with_context(|| format!("Failed to load TLD list from {}", source))?;
    let tlds = apply_tld_filters(tlds, &config.tlds.always, &config.tlds.never);

    if tlds.is_empty() {
        bail!("No TLDs left to probe after applying the never list");
    }

    info!(source = %source, count = tlds.len(), "TLD list loaded");
    Ok(tlds)
}

fn load_renderer(config: &Config) -> anyhow::Result<Renderer> {
    let template = match &config.render.template {
        Some(path) => LinkTemplate::load(path)?,
        None => LinkTemplate::builtin(),
    };
    Ok(template.into_renderer())
}

async fn run_ndjson(prober: &Prober, label: &str) -> anyhow::Result<()> {
    if label.is_empty() {
        bail!("Label required in NDJSON mode");
    }

    let mut stream = Box::pin(prober.probe_stream(label));
    let mut stdout = io::stdout();

    while let Some(outcome) = stream.next().await {
        let line = NdjsonLine {
            query: label,
            domain: outcome.probe_url.trim_start_matches("http://"),
            valid: outcome.valid,
            display: &outcome.url,
        };

        serde_json::to_writer(&mut stdout, &line)?;
        writeln!(stdout)?;
        stdout.flush()?;
    }

    Ok(())
}
