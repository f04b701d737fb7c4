//! Interactive REPL shell (spec.md §6.2): rustyline-based line editing with
//! history, continuation-aware parsing, and signal-driven cancellation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use colored::Colorize;
use helm_core::Priority;
use helm_errors::HelmError;
use helm_queue::{CommandParser, ParseOutcome};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config as RlConfig, EditMode, Editor};

use crate::app::App;
use crate::exit;

const PROMPT: &str = "helm> ";
const CONTINUATION_PROMPT: &str = "....> ";
const DOUBLE_INTERRUPT_WINDOW: Duration = Duration::from_secs(2);

fn history_path() -> PathBuf {
    std::env::temp_dir().join("helmctl_history")
}

/// Run the REPL until the user exits or a second Ctrl+C requests shutdown.
/// Returns the process exit code.
pub async fn run(app: Arc<App>) -> i32 {
    let mut editor: Editor<(), DefaultHistory> = match Editor::with_config(
        RlConfig::builder().edit_mode(EditMode::Emacs).auto_add_history(false).build(),
    ) {
        Ok(editor) => editor,
        Err(error) => {
            eprintln!("{} failed to start line editor: {error}", "error:".red().bold());
            return exit::FAILURE;
        }
    };
    let _ = editor.load_history(&history_path());

    let mut parser = CommandParser::new();
    let mut last_interrupt: Option<Instant> = None;

    loop {
        let prompt = if parser.is_pending() { CONTINUATION_PROMPT } else { PROMPT };

        match editor.readline(prompt) {
            Ok(line) => {
                last_interrupt = None;
                let _ = editor.add_history_entry(line.as_str());
                match parser.feed(&line) {
                    Ok(ParseOutcome::NeedsContinuation) => continue,
                    Ok(ParseOutcome::Complete(parsed)) => {
                        if parsed.command.is_empty() {
                            continue;
                        }
                        if parsed.command == "exit" || parsed.command == "quit" {
                            break;
                        }
                        run_one(&app, parsed).await;
                    }
                    Err(error) => {
                        render_error(&app, &error);
                        parser = CommandParser::new();
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                parser = CommandParser::new();
                let now = Instant::now();
                let is_double = last_interrupt.is_some_and(|prev| now.duration_since(prev) < DOUBLE_INTERRUPT_WINDOW);
                if is_double {
                    break;
                }
                last_interrupt = Some(now);
                println!("(press Ctrl+C again within 2s to exit)");
            }
            Err(ReadlineError::Eof) => break,
            Err(error) => {
                eprintln!("{} {error}", "error:".red().bold());
                break;
            }
        }
    }

    let _ = editor.save_history(&history_path());
    app.shutdown().await;
    exit::SUCCESS
}

async fn run_one(app: &App, parsed: helm_queue::ParsedCommand) {
    let ctx = app.execution_context();
    let ticket = match app.queue.enqueue(parsed, ctx, Priority::Normal) {
        Ok(ticket) => ticket,
        Err(error) => {
            render_error(app, &error);
            return;
        }
    };
    match app.queue.await_result(ticket).await {
        Ok(output) => {
            if !output.stdout.is_empty() {
                print!("{}", output.stdout);
            }
            if !output.stderr.is_empty() {
                eprint!("{}", output.stderr);
            }
        }
        Err(error) => render_error(app, &error),
    }
}

fn render_error(app: &App, error: &HelmError) {
    eprintln!("{} {error}", "error:".red().bold());
    if app.config.show_error_details {
        eprintln!("  kind: {:?}", error.kind());
    }
}
