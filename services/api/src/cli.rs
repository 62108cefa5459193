use crate::batch::{run_apply, run_preview, ApplyArgs, PreviewArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use rewards_engine::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Rewards Eligibility Engine",
    about = "Serve and exercise the agent reward eligibility engine from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Run a batch evaluation over the demo population and print the outcome
    Apply(ApplyArgs),
    /// Dry-run the configured rules over the demo population
    Preview(PreviewArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Apply(args) => run_apply(args),
        Command::Preview(args) => run_preview(args),
    }
}
