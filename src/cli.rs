use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hostform")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Converge hosts to a declared configuration, idempotently", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Declaration file (default: ~/.config/hostform/hostform.toml)
    #[arg(short, long, global = true, env = "HOSTFORM_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Converge hosts to the declared state
    Apply(ApplyArgs),

    /// Show what apply would change, without changing anything
    Check(RunArgs),

    /// Load and validate every host plan without contacting any host
    Validate,

    /// List declared hosts
    Hosts,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Options shared by apply and check
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Only converge these hosts (repeatable)
    #[arg(long = "host", value_name = "NAME")]
    pub hosts: Vec<String>,

    /// Only resources matching TARGET, plus their prerequisites
    /// (kind, kind.id or id substring)
    #[arg(long, value_name = "TARGET")]
    pub only: Option<String>,

    /// Hosts converged in parallel (default from [settings])
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Show unified diffs of file content
    #[arg(short, long)]
    pub diff: bool,

    /// Run handlers even when the run failed
    #[arg(long)]
    pub force_handlers: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Args, Debug, Clone)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Only show what would change (same as `hostform check`)
    #[arg(long)]
    pub check: bool,

    /// Skip the check pass and confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
