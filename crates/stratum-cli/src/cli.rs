use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "stratum")]
#[command(version)]
#[command(about = "Converge infrastructure to a declared resource graph", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (defaults to <config dir>/stratum/config.json)
    #[arg(long, global = true, env = "STRATUM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show what apply would change, walking every runtime's plan-only path
    Preview(PreviewArgs),

    /// Converge the stack to the spec
    Apply(ApplyArgs),

    /// Delete everything the stack's state records
    Destroy(DestroyArgs),

    /// Print the stack's stored state
    State(StackArgs),
}

#[derive(Args)]
pub struct StackArgs {
    /// Stack name
    #[arg(long, env = "STRATUM_STACK")]
    pub stack: String,
}

#[derive(Args)]
pub struct SpecArgs {
    /// Compiled spec (JSON resource list)
    #[arg(long, default_value = "stratum.json")]
    pub spec: PathBuf,
}

#[derive(Args)]
pub struct PreviewArgs {
    #[command(flatten)]
    pub stack: StackArgs,

    #[command(flatten)]
    pub spec: SpecArgs,
}

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub stack: StackArgs,

    #[command(flatten)]
    pub spec: SpecArgs,

    /// Plan and walk runtimes without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Apply without stopping at the plan
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct DestroyArgs {
    #[command(flatten)]
    pub stack: StackArgs,

    /// Walk the delete plan without deleting anything
    #[arg(long)]
    pub dry_run: bool,

    /// Destroy without stopping at the plan
    #[arg(short, long)]
    pub yes: bool,
}
