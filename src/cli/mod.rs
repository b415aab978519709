//! Command-line interface definitions for the `scanywhere` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Parser, ValueEnum};

/// Top-level CLI for the `scanywhere` binary.
#[derive(Debug, Parser)]
#[command(
    name = "scanywhere",
    about = "Measure geo-blocking through VPN gateway containers",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Run measurement trials through a provider profile.
    #[command(name = "scan", about = "Run measurement trials through a provider profile")]
    Scan(ScanCommand),
    /// Remove containers and networks left behind by earlier sessions.
    #[command(
        name = "sweep",
        about = "Remove containers and networks left behind by earlier sessions"
    )]
    Sweep,
}

/// How exit locations are drawn for each trial.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub(crate) enum SelectionArg {
    /// Leave the location to the gateway unless the profile lists candidates.
    Random,
    /// Uniform over countries, so small countries are not drowned out.
    #[default]
    Normalized,
}

/// Arguments for the `scanywhere scan` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ScanCommand {
    /// Provider profile to run trials through.
    #[arg(long, value_name = "NAME")]
    pub(crate) profile: String,
    /// Workload image run behind each confirmed tunnel.
    #[arg(long, value_name = "IMAGE", default_value = "check-ip-connectivity")]
    pub(crate) workload: String,
    /// Exit location selection mode.
    #[arg(long, value_enum, default_value_t = SelectionArg::Normalized)]
    pub(crate) selection: SelectionArg,
    /// Prune dangling workload images before starting. Containers are left
    /// to `scanywhere sweep`.
    #[arg(long)]
    pub(crate) prune: bool,
    /// Chain a relay gateway behind the provider gateway.
    #[arg(long)]
    pub(crate) chain: bool,
    /// Build the workload image (and relay image when chaining) first.
    #[arg(long)]
    pub(crate) build: bool,
    /// Stop after this many trials; runs until interrupted otherwise.
    #[arg(long, value_name = "N")]
    pub(crate) trials: Option<u64>,
    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    pub(crate) log: String,
}
