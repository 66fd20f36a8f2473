//! Common utilities for the engine binaries.
//!
//! Shared initialization, CLI parsing, and setup code.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Common CLI arguments.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CommonArgs {
    /// Root directory for journals, incidents and event logs
    #[arg(short, long, default_value = "qtsw-data")]
    pub data_root: PathBuf,

    /// Canonical instrument
    #[arg(long, default_value = "MES")]
    pub instrument: String,

    /// Instrument routed to the broker (defaults to the canonical name)
    #[arg(long)]
    pub execution_instrument: Option<String>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,
}

impl CommonArgs {
    pub fn execution_instrument(&self) -> &str {
        self.execution_instrument
            .as_deref()
            .unwrap_or(&self.instrument)
    }
}

/// Initialize tracing/logging.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    Ok(())
}
