//! Terminal rendering of transcripts.

use chrono::{DateTime, Local, Utc};
use colored::Colorize;
use streamchat_core::{EntryStatus, Transcript, TranscriptEntry};

/// Status suffix printed after a finished response, if any.
fn status_note(status: &EntryStatus) -> Option<String> {
    match status {
        EntryStatus::Complete => None,
        EntryStatus::Pending => Some("[streaming]".bright_black().to_string()),
        EntryStatus::Interrupted => Some("[interrupted]".yellow().to_string()),
        EntryStatus::Failed { reason } => Some(format!("[failed: {reason}]").red().to_string()),
    }
}

fn timestamp(submitted_at: &DateTime<Utc>) -> String {
    submitted_at
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// Full rendering of one entry for `history`.
pub fn format_entry(entry: &TranscriptEntry) -> String {
    let mut out = format!(
        "{} {}\n",
        timestamp(&entry.submitted_at).bright_black(),
        format!("> {}", entry.prompt).green()
    );
    if !entry.response.is_empty() {
        out.push_str(&entry.response.bright_blue().to_string());
        out.push('\n');
    }
    if let Some(note) = status_note(&entry.status) {
        out.push_str(&note);
        out.push('\n');
    }
    out
}

/// Prints only what changed between successive transcript snapshots.
///
/// Responses grow by appending, so each snapshot adds a suffix to the entry
/// being streamed. Entries at or before `shown_through` are never printed again.
#[derive(Debug, Default)]
pub struct IncrementalRenderer {
    shown_through: Option<DateTime<Utc>>,
    printed: usize,
}

impl IncrementalRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts after the last entry of `transcript`, which is assumed already on screen.
    pub fn resume_after(transcript: &Transcript) -> Self {
        Self {
            shown_through: transcript.last().map(|entry| entry.submitted_at),
            printed: 0,
        }
    }

    /// Returns the text to print for `transcript` since the previous call.
    pub fn render(&mut self, transcript: &Transcript) -> String {
        if transcript.is_empty() {
            self.shown_through = None;
            self.printed = 0;
            return String::new();
        }

        let mut out = String::new();
        let seen = self.shown_through;
        let unseen = transcript
            .iter()
            .filter(|entry| seen.is_none_or(|seen| entry.submitted_at > seen));
        for entry in unseen {
            let response = entry.response.as_str();
            if response.len() > self.printed && response.is_char_boundary(self.printed) {
                out.push_str(&response[self.printed..].bright_blue().to_string());
                self.printed = response.len();
            }

            if !entry.is_final() {
                break;
            }
            if self.printed > 0 {
                out.push('\n');
            }
            if let Some(note) = status_note(&entry.status) {
                out.push_str(&note);
                out.push('\n');
            }
            self.shown_through = Some(entry.submitted_at);
            self.printed = 0;
        }
        out
    }
}
