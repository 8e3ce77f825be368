use anyhow::Result;
use clap::{Parser, Subcommand};

mod app;
mod commands;
mod logging;
mod render;

use app::{App, GlobalArgs};

#[derive(Parser)]
#[command(name = "streamchat")]
#[command(
    about = "Streaming chat with a saved transcript, plus an SSE demo server",
    long_about = None
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat (default)
    Chat,
    /// Print the saved transcript
    History {
        /// Print the persisted JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Delete the saved transcript
    Clear,
    /// Serve the event stream demo over HTTP
    Serve {
        /// Listen address, e.g. 127.0.0.1:3000
        #[arg(long)]
        addr: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.global.verbose)?;

    let app = App::load(&cli.global)?;

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => commands::chat::run(app.session()?).await?,
        Commands::History { json } => {
            commands::history::run(&app.transcript_store()?, json, &mut std::io::stdout())?
        }
        Commands::Clear => commands::clear::run(&app.transcript_store()?)?,
        Commands::Serve { addr } => {
            let mut server = app.config.server.clone();
            if let Some(addr) = addr {
                server.addr = addr;
            }
            commands::serve::run(server).await?
        }
    }

    Ok(())
}
