use anyhow::Result;
use colored::Colorize;
use streamchat_core::config::ServerConfig;
use tokio_util::sync::CancellationToken;

/// Runs the event stream demo until Ctrl-C.
pub async fn run(config: ServerConfig) -> Result<()> {
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });

    println!(
        "{}",
        format!("Serving event stream on http://{}/ (Ctrl-C to stop)", config.addr).bright_magenta()
    );
    streamchat_server::serve(&config, shutdown).await?;
    println!("{}", "Server stopped.".bright_green());
    Ok(())
}
