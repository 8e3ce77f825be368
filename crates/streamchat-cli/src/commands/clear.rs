use anyhow::Result;
use colored::Colorize;
use streamchat_core::TranscriptStore;

/// Deletes the saved transcript.
pub fn run(store: &TranscriptStore) -> Result<()> {
    store.clear()?;
    println!("{}", "Transcript cleared.".bright_green());
    Ok(())
}
