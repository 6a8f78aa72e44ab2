// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tabwerk — scanned-table preprocessing and asynchronous table recognition.
//
// Entry point. Initialises logging, resolves configuration and credentials,
// builds the recognition client, and runs the selected pipeline stages.

mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use tabwerk_core::types::display_name;
use tabwerk_pipeline::{Pipeline, RunMode, RunReport};
use tabwerk_recognition::{BaiduTableClient, JobOrchestrator, ReqwestFetcher};

use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mode = cli.command.mode();
    let args = cli.command.args();

    let config = args.resolve_config().context("invalid configuration")?;
    tracing::info!(
        path = %args.path.display(),
        ?mode,
        blueprint = config.blueprint,
        max_bytes = config.constraint.max_byte_size,
        "Tabwerk starting"
    );

    let mut pipeline = Pipeline::new(config.clone());
    if mode != RunMode::PreprocessOnly {
        let Some((api_key, secret_key)) = args.credentials() else {
            bail!("recognition needs TABWERK_API_KEY and TABWERK_SECRET_KEY");
        };
        let service = BaiduTableClient::connect(api_key, secret_key, &config.service)
            .await
            .context("could not authenticate with the recognition service")?;
        let fetcher = ReqwestFetcher::new(Duration::from_secs(config.service.request_timeout_secs))?;
        pipeline = pipeline.with_orchestrator(JobOrchestrator::new(
            Arc::new(service),
            Arc::new(fetcher),
            &config,
        ));
    }

    let report = pipeline.run(&args.path, mode).await?;
    print_summary(&report);
    Ok(())
}

fn print_summary(report: &RunReport) {
    for dir in &report.directories {
        println!("{}", display_name(&dir.directory));
        if let Some(pre) = dir.preprocessing {
            println!(
                "  preprocessed {}/{} ({} failed)",
                pre.succeeded, pre.attempted, pre.failed
            );
        }
        if let Some(rec) = dir.recognition {
            println!(
                "  recognized   {}/{} ({} failed)",
                rec.succeeded, rec.attempted, rec.failed
            );
        }
    }
    let (pre, rec) = report.totals();
    if pre.failed + rec.failed > 0 {
        println!("Failures logged to {}", report.error_log.display());
    }
    println!("Finished in {:.1}s", report.elapsed.as_secs_f64());
}
