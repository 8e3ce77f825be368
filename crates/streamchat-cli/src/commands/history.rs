use std::io::Write;

use anyhow::Result;
use colored::Colorize;
use streamchat_core::{Transcript, TranscriptStore};

use crate::render::format_entry;

/// Prints the saved transcript, as text or as the persisted JSON array.
pub fn run(store: &TranscriptStore, json: bool, out: &mut impl Write) -> Result<()> {
    let transcript = store.load()?;
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&transcript)?)?;
    } else {
        write_text(&transcript, out)?;
    }
    Ok(())
}

fn write_text(transcript: &Transcript, out: &mut impl Write) -> Result<()> {
    if transcript.is_empty() {
        writeln!(out, "{}", "No messages yet.".bright_black())?;
        return Ok(());
    }
    for entry in transcript {
        write!(out, "{}", format_entry(entry))?;
    }
    Ok(())
}
