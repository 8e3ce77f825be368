//! Interactive chat REPL.

use std::borrow::Cow::{self, Borrowed, Owned};
use std::io::Write;

use anyhow::Result;
use colored::Colorize;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};
use streamchat_core::SubmitOutcome;
use streamchat_core::session::{Rejection, SessionController};

use crate::render::{IncrementalRenderer, format_entry};

/// Slash commands with the description shown in hints and `/help`.
const COMMANDS: [(&str, &str); 4] = [
    ("/clear", "delete the transcript"),
    ("/help", "list commands"),
    ("/history", "show the saved transcript"),
    ("/quit", "leave the chat"),
];

/// Completion, highlighting and hints for slash commands.
#[derive(Clone, Copy)]
struct ChatHelper;

impl ChatHelper {
    fn matching(prefix: &str) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        COMMANDS
            .into_iter()
            .filter(move |(name, _)| name.starts_with(prefix))
    }
}

impl Helper for ChatHelper {}

impl Completer for ChatHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let line = &line[..pos];

        if line.starts_with('/') {
            let candidates: Vec<Pair> = Self::matching(line)
                .map(|(name, description)| Pair {
                    display: format!("{name:<10}{description}"),
                    replacement: name.to_string(),
                })
                .collect();
            Ok((0, candidates))
        } else {
            Ok((0, vec![]))
        }
    }
}

impl Highlighter for ChatHelper {
    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        Owned(hint.bright_black().to_string())
    }

    /// Known commands are cyan; a slash prefix that matches none is yellow.
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if !line.starts_with('/') {
            return Borrowed(line);
        }
        if Self::matching(line.trim_end()).next().is_some() {
            Owned(line.bright_cyan().to_string())
        } else {
            Owned(line.yellow().to_string())
        }
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

impl Hinter for ChatHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Option<String> {
        let line = &line[..pos];

        if !line.starts_with('/') || line.contains(' ') {
            return None;
        }
        let mut matches = Self::matching(line);
        let (name, description) = matches.next()?;
        if matches.next().is_some() {
            return None;
        }
        Some(format!("{}  {description}", &name[line.len()..]))
    }
}

impl Validator for ChatHelper {}

/// A line typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Quit,
    Clear,
    History,
    Help,
    Unknown(&'a str),
    Prompt(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    match line.trim() {
        "quit" | "exit" | "/quit" | "/exit" => Input::Quit,
        "/clear" => Input::Clear,
        "/history" => Input::History,
        "/help" => Input::Help,
        trimmed if trimmed.starts_with('/') => Input::Unknown(trimmed),
        _ => Input::Prompt(line),
    }
}

fn print_help() {
    println!("{}", "Type a message and press Enter to send it.".bright_black());
    for (name, description) in COMMANDS {
        println!("{}", format!("  {name:<10}{description}").bright_black());
    }
    println!(
        "{}",
        "Ctrl-C while a reply streams interrupts it; Ctrl-D leaves.".bright_black()
    );
}

/// Runs the REPL until `quit` or Ctrl-D.
pub async fn run(session: SessionController) -> Result<()> {
    let mut rl: Editor<ChatHelper, DefaultHistory> = Editor::new()?;
    rl.set_helper(Some(ChatHelper));

    println!("{}", "=== streamchat ===".bright_magenta().bold());
    println!(
        "{}",
        format!("Model: {}. Type /help for commands, 'quit' to exit.", session.config().model)
            .bright_black()
    );

    let history = session.transcript();
    for entry in &history {
        print!("{}", format_entry(entry));
    }
    if !history.is_empty() {
        println!();
    }

    let mut renderer = IncrementalRenderer::resume_after(&history);

    loop {
        let line = match rl.readline(">> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("{}", "Nothing is streaming. Use /quit or Ctrl-D to leave.".yellow());
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("{}", "Goodbye!".bright_green());
                break;
            }
            Err(err) => {
                eprintln!("{}", format!("Error: {err:?}").red());
                break;
            }
        };

        match parse_input(&line) {
            Input::Quit => {
                println!("{}", "Goodbye!".bright_green());
                break;
            }
            Input::Clear => match session.clear() {
                Ok(()) => {
                    renderer = IncrementalRenderer::new();
                    println!("{}", "Transcript cleared.".bright_green());
                }
                Err(err) => eprintln!("{}", format!("Failed to clear transcript: {err}").red()),
            },
            Input::History => {
                let transcript = session.transcript();
                if transcript.is_empty() {
                    println!("{}", "No messages yet.".bright_black());
                }
                for entry in &transcript {
                    print!("{}", format_entry(entry));
                }
            }
            Input::Help => print_help(),
            Input::Unknown(command) => {
                println!("{}", format!("Unknown command: {command}").bright_black());
            }
            Input::Prompt(prompt) => {
                if prompt.trim().is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(prompt);
                stream_reply(&session, prompt, &mut renderer).await;
            }
        }
    }

    Ok(())
}

/// Submits `prompt` and prints the reply as it grows. Ctrl-C cancels the stream.
async fn stream_reply(
    session: &SessionController,
    prompt: &str,
    renderer: &mut IncrementalRenderer,
) {
    let submission = match session.begin(prompt) {
        Ok(submission) => submission,
        Err(Rejection::EmptyPrompt) => return,
        Err(Rejection::Busy) => {
            println!("{}", "Still answering the previous message.".yellow());
            return;
        }
    };

    let mut updates = session.subscribe();
    let mut run = tokio::spawn(submission.run());
    let mut stdout = std::io::stdout();

    let outcome = loop {
        tokio::select! {
            joined = &mut run => break joined,
            changed = updates.changed() => {
                if changed.is_err() {
                    break (&mut run).await;
                }
                let snapshot = updates.borrow_and_update().clone();
                print!("{}", renderer.render(&snapshot));
                let _ = stdout.flush();
            }
            _ = tokio::signal::ctrl_c() => {
                session.cancel();
            }
        }
    };

    print!("{}", renderer.render(&session.transcript()));
    let _ = stdout.flush();

    match outcome {
        Ok(SubmitOutcome::Discarded { .. }) => {
            println!("{}", "Response discarded.".bright_black());
        }
        Ok(outcome) => tracing::debug!(?outcome, "Submission finished"),
        Err(err) => eprintln!("{}", format!("Submission task failed: {err}").red()),
    }
}
