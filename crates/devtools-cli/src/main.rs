mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "devtools")]
#[command(about = "Host/Client orchestration for editor automation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Claim a role (host or client) and serve until interrupted
    Serve {
        /// Target workspace directory
        #[arg(short, long, default_value = ".")]
        workspace: String,

        /// Extension package under development
        #[arg(short, long)]
        extension: Option<String>,

        /// MCP server package
        #[arg(short, long)]
        mcp: Option<String>,

        /// Editor binary to spawn for the client window
        #[arg(long, default_value = "code")]
        editor_bin: String,
    },

    /// Print the host's diagnostic snapshot
    Status,

    /// Ping the host or client pipe
    Ping {
        /// Ping the client pipe instead of the host pipe
        #[arg(short, long)]
        client: bool,
    },

    /// Ask the host to shut the client down gracefully
    Teardown,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            workspace,
            extension,
            mcp,
            editor_bin,
        } => {
            commands::serve::execute(&workspace, extension.as_deref(), mcp.as_deref(), &editor_bin)
                .await?;
        }
        Commands::Status => {
            commands::status::execute().await?;
        }
        Commands::Ping { client } => {
            commands::ping::execute(client).await?;
        }
        Commands::Teardown => {
            commands::teardown::execute().await?;
        }
    }

    Ok(())
}
