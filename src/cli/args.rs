//! Command line argument parsing for the Strata CLI using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Strata - segment storage inspection and maintenance
#[derive(Parser, Debug, Clone)]
#[command(name = "strata")]
#[command(about = "Inspect, check and merge Strata segments")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct StrataArgs {
    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl StrataArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1,
                n => n,
            }
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print a segment's metadata, field table and chunk map
    #[command(name = "inspect")]
    Inspect(InspectArgs),

    /// Verify a segment's file checksums and postings invariants
    #[command(name = "check")]
    Check(CheckArgs),

    /// Merge segments into a new one
    #[command(name = "merge")]
    Merge(MergeArgs),
}

/// Arguments for the inspect command
#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    /// Directory holding the segments
    #[arg(short, long)]
    pub dir: PathBuf,

    /// Segment name, e.g. seg_0
    pub segment: String,

    /// Emit JSON instead of a human-readable listing
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the check command
#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    /// Directory holding the segments
    #[arg(short, long)]
    pub dir: PathBuf,

    /// Segment name, e.g. seg_0
    pub segment: String,
}

/// Arguments for the merge command
#[derive(Args, Debug, Clone)]
pub struct MergeArgs {
    /// Directory holding the segments
    #[arg(short, long)]
    pub dir: PathBuf,

    /// Name of the merged segment to create
    #[arg(short, long)]
    pub output: String,

    /// Roll the merged segment into a compound container
    #[arg(long)]
    pub compound: bool,

    /// Source segment names, in merge order
    #[arg(required = true, num_args = 1..)]
    pub sources: Vec<String>,
}
