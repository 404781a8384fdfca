use clap::Parser;
use iex_dap::server::DapServer;
use iex_repl::IexSpawner;
use std::sync::Arc;
use tokio::io::{stdin, stdout};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "iex-dap")]
#[command(about = "Debug adapter for Elixir Mix projects, backed by iex")]
struct Cli {
    /// Log filter, e.g. "iex_dap=debug,iex_repl=trace"
    #[arg(long)]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // stdout carries the protocol, so diagnostics go to stderr.
    tracing_subscriber::registry()
        .with(
            cli.log
                .map(tracing_subscriber::EnvFilter::new)
                .unwrap_or_else(|| {
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "iex_dap=info,iex_repl=info".into())
                }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let server = DapServer::new(Arc::new(IexSpawner));
    server.run(stdin(), stdout()).await?;

    Ok(())
}
