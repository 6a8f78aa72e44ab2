// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command-line interface — subcommands, shared flags, and how the flags
// override the loaded configuration.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tabwerk_core::config::TabwerkConfig;
use tabwerk_core::error::Result;
use tabwerk_pipeline::RunMode;

#[derive(Debug, Parser)]
#[command(name = "tabwerk")]
#[command(version, about = "Prepare scanned tables and run them through asynchronous table recognition")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Preprocess every image, then recognize the results.
    Run(RunArgs),
    /// Only preprocess: denoise, binarize and compress under the size limit.
    Preprocess(RunArgs),
    /// Only recognize images an earlier run already preprocessed.
    Recognize(RunArgs),
}

impl Command {
    pub fn mode(&self) -> RunMode {
        match self {
            Command::Run(_) => RunMode::Full,
            Command::Preprocess(_) => RunMode::PreprocessOnly,
            Command::Recognize(_) => RunMode::RecognizeOnly,
        }
    }

    pub fn args(&self) -> &RunArgs {
        match self {
            Command::Run(args) | Command::Preprocess(args) | Command::Recognize(args) => args,
        }
    }
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Directory to scan recursively, or a single image.
    pub path: PathBuf,

    /// TOML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Use the dark-background (blueprint) filter preset.
    #[arg(long)]
    pub blueprint: bool,

    /// Upload size ceiling in bytes.
    #[arg(long)]
    pub max_bytes: Option<u64>,

    /// Images preprocessed in parallel.
    #[arg(long)]
    pub preprocess_workers: Option<usize>,

    /// Recognition jobs in flight at once.
    #[arg(long)]
    pub recognition_workers: Option<usize>,

    /// Give up on a recognition job after this many seconds.
    #[arg(long)]
    pub poll_timeout: Option<u64>,

    /// Recognition service API key.
    #[arg(long, env = "TABWERK_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Recognition service secret key.
    #[arg(long, env = "TABWERK_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,
}

impl RunArgs {
    /// Load the config file (or defaults), apply flag overrides, validate.
    pub fn resolve_config(&self) -> Result<TabwerkConfig> {
        let mut config = match &self.config {
            Some(path) => TabwerkConfig::from_toml_file(path)?,
            None => TabwerkConfig::default(),
        };
        self.apply_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&self, config: &mut TabwerkConfig) {
        if self.blueprint {
            config.blueprint = true;
        }
        if let Some(max_bytes) = self.max_bytes {
            config.constraint.max_byte_size = max_bytes;
        }
        if let Some(workers) = self.preprocess_workers {
            config.workers.preprocess = workers;
        }
        if let Some(workers) = self.recognition_workers {
            config.workers.recognition = workers;
        }
        if let Some(timeout) = self.poll_timeout {
            config.polling.timeout_secs = Some(timeout);
        }
    }

    /// Both credentials, when both are present and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.api_key.as_deref(), self.secret_key.as_deref()) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => Some((key, secret)),
            _ => None,
        }
    }
}
