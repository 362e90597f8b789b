use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::insight::QueryTarget;
use crate::scan::ProviderKind;

#[derive(Parser)]
#[command(name = "skyscan")]
#[command(about = "A parallel AWS and Azure inventory scanner")]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Snapshot database (overrides the config file)
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Show debug logging on stderr
    #[arg(long, short = 'v', global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Scan every scope of a cloud account and save a snapshot
    Scan(ScanArgs),

    /// Display the most recent scan or a specific snapshot
    Report(ReportArgs),

    /// Compare two snapshots of one provider
    Diff(DiffArgs),

    /// Ask a question about the latest snapshot(s)
    Query(QueryArgs),

    /// List the services each provider can scan
    Services(ServicesArgs),

    /// Serve the scan and query endpoints over HTTP
    Serve(ServeArgs),
}

#[derive(Parser)]
pub struct ScanArgs {
    /// Cloud provider to scan
    pub provider: ProviderKind,

    /// Services to scan (defaults to the provider's default set)
    #[arg(long, value_delimiter = ',')]
    pub services: Vec<String>,

    /// AWS profile (overrides the config file)
    #[arg(long)]
    pub profile: Option<String>,

    /// Azure subscription ID (overrides the config file)
    #[arg(long)]
    pub subscription: Option<String>,

    /// Maximum scopes scanned at once (overrides the config file)
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Output as JSON instead of table
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Do not save a snapshot
    #[arg(long, default_value_t = false)]
    pub no_save: bool,
}

#[derive(Parser)]
pub struct ReportArgs {
    /// Provider whose latest snapshot to show
    #[arg(long)]
    pub provider: Option<ProviderKind>,

    /// List snapshots instead of showing one
    #[arg(long, default_value_t = false)]
    pub list: bool,

    /// Show a specific snapshot by ID
    #[arg(long)]
    pub id: Option<String>,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Parser)]
pub struct DiffArgs {
    /// Provider whose two most recent snapshots are compared
    #[arg(long, default_value = "aws")]
    pub provider: ProviderKind,

    /// Starting snapshot ID for comparison
    #[arg(long)]
    pub from: Option<String>,

    /// Ending snapshot ID for comparison
    #[arg(long)]
    pub to: Option<String>,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Parser)]
pub struct QueryArgs {
    /// Which snapshots to ask about: aws, azure or all
    #[arg(long, default_value = "all")]
    pub provider: QueryTarget,

    /// The question, in plain language
    #[arg(required = true, num_args = 1..)]
    pub question: Vec<String>,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Parser)]
pub struct ServicesArgs {
    /// Only list this provider's services
    #[arg(long)]
    pub provider: Option<ProviderKind>,
}

#[derive(Parser)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub addr: SocketAddr,
}
