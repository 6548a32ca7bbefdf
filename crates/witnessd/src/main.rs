//! witnessd: collects API witnesses and ships them to the learn service.
//!
//!   witnessd ingest              read JSON-lines frames from stdin
//!   witnessd replay <file>...    replay recorded HTTP archives
//!   witnessd init-config         write the default config file

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use witness_core::config::WitnessConfig;
use witness_core::{LearnSessionId, NetworkDirection};
use witness_services::{
    load_archive, replay_archive, Collector, CollectorSettings, CollectorStats, LearnClient,
    Obfuscator, PluginChain, ReplayReport, RestLearnClient, WitnessCollector, WitnessUploader,
};

mod ingest;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    match args.as_slice() {
        ["ingest"] => run(Mode::Ingest).await,
        ["replay", paths @ ..] if !paths.is_empty() => {
            run(Mode::Replay(paths.iter().map(PathBuf::from).collect())).await
        }
        ["init-config"] => {
            let path = WitnessConfig::write_default_if_missing()?;
            println!("config: {}", path.display());
            Ok(())
        }
        ["help"] | ["--help"] | ["-h"] | [] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!("witnessd: API witness collector");
    println!();
    println!("USAGE:");
    println!("  witnessd ingest              Read JSON-lines frames from stdin");
    println!("  witnessd replay <file>...    Replay recorded HTTP archives");
    println!("  witnessd init-config         Write the default config file");
    println!();
    println!("Credentials come from WITNESS_API_KEY_ID / WITNESS_API_KEY_SECRET");
    println!("or the [credentials] section of the config file.");
}

enum Mode {
    Ingest,
    Replay(Vec<PathBuf>),
}

async fn run(mode: Mode) -> Result<()> {
    // Config and credential problems are fatal, and must surface before
    // any frame is read.
    let config = WitnessConfig::load().context("failed to load config")?;
    config.validate()?;
    let credentials = config.credentials()?;

    let session = if config.learn.session_id.is_empty() {
        LearnSessionId::generate()
    } else {
        LearnSessionId::new(config.learn.session_id.clone())
    };
    tracing::info!(
        session = %session,
        service = %config.learn.service_id,
        base_url = %config.learn.base_url,
        "witnessd starting"
    );

    let client: Arc<dyn LearnClient> = Arc::new(
        RestLearnClient::new(&config.learn.base_url, credentials, &config.transport)
            .context("failed to create learn client")?,
    );

    let inbound_stats = CollectorStats::shared();
    let outbound_stats = CollectorStats::shared();
    let mut inbound = build_collector(
        NetworkDirection::Inbound,
        &config,
        client.clone(),
        &session,
        inbound_stats.clone(),
    )?;
    let mut outbound = build_collector(
        NetworkDirection::Outbound,
        &config,
        client,
        &session,
        outbound_stats.clone(),
    )?;

    if config.api.status_port != 0 {
        let state = witness_api::ApiState::new(session.clone(), inbound_stats, outbound_stats);
        let port = config.api.status_port;
        tokio::spawn(async move {
            if let Err(e) = witness_api::serve(state, port).await {
                tracing::error!(error = %e, "status server failed");
            }
        });
    }

    let result = drive(mode, &mut inbound, &mut outbound).await;

    // Both collectors are closed on every exit path so queued witnesses
    // still ship when an archive or the input stream fails.
    inbound.close().await;
    outbound.close().await;
    tracing::info!(
        inbound = ?inbound.stats().snapshot(),
        outbound = ?outbound.stats().snapshot(),
        "witnessd finished"
    );
    result
}

async fn drive(
    mode: Mode,
    inbound: &mut dyn Collector,
    outbound: &mut dyn Collector,
) -> Result<()> {
    match mode {
        Mode::Replay(paths) => {
            let failed = replay_files(&paths, inbound, outbound);
            if failed > 0 {
                anyhow::bail!("{failed} of {} archives could not be loaded", paths.len());
            }
        }
        Mode::Ingest => {
            let reader = tokio::io::BufReader::new(tokio::io::stdin());
            tokio::select! {
                r = ingest::ingest_lines(reader, inbound, outbound) => {
                    let summary = r?;
                    tracing::info!(
                        frames = summary.frames,
                        skipped = summary.skipped,
                        "input closed"
                    );
                }
                _ = tokio::signal::ctrl_c() => tracing::info!("shutdown signal received"),
            }
        }
    }
    Ok(())
}

/// Replay each archive in turn. An archive that cannot be loaded is logged
/// and skipped. Returns the number of skipped archives.
fn replay_files(
    paths: &[PathBuf],
    inbound: &mut dyn Collector,
    outbound: &mut dyn Collector,
) -> usize {
    let mut failed = 0;
    for path in paths {
        let archive = match load_archive(path) {
            Ok(a) => a,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "skipping archive");
                failed += 1;
                continue;
            }
        };
        let report = replay_archive(&archive, &mut *inbound, &mut *outbound);
        tracing::info!(
            path = %path.display(),
            successful = report.successful_entries,
            total = report.total_entries,
            "archive replayed"
        );
        print_replay_summary(path, &report);
    }
    failed
}

fn build_collector(
    direction: NetworkDirection,
    config: &WitnessConfig,
    client: Arc<dyn LearnClient>,
    session: &LearnSessionId,
    stats: Arc<CollectorStats>,
) -> Result<WitnessCollector> {
    let plugins =
        PluginChain::from_filters(&config.filters).context("invalid exclusion pattern")?;
    let uploader = WitnessUploader::new(
        client,
        session.clone(),
        direction,
        config.upload.request_timeout(),
        stats.clone(),
    );
    Ok(WitnessCollector::new(
        direction,
        CollectorSettings::from_config(config),
        uploader,
        plugins,
        Obfuscator,
        stats,
    ))
}

fn print_replay_summary(path: &std::path::Path, report: &ReplayReport) {
    if report.errors.is_empty() {
        return;
    }
    eprintln!(
        "warning: {}: {} of {} entries had errors and were skipped.",
        path.display(),
        report.failed_entries(),
        report.total_entries
    );
    eprintln!(
        "warning: witnesses were generated from the {} entries processed successfully.",
        report.successful_entries
    );
    eprintln!("warning: sample errors:");
    for sample in report.errors.samples() {
        eprintln!("\t- {sample}");
    }
}
