//! Single-shot mode: parse one command line from argv, run it to
//! completion, print its output, and map the result to a process exit code.

use std::sync::Arc;

use colored::Colorize;
use helm_core::Priority;
use helm_queue::parse_complete;

use crate::app::App;
use crate::exit;

/// Run `args` (already split by the shell, joined back into one logical
/// line so quoting/escaping rules stay uniform with the REPL) as a single
/// command and return the process exit code.
pub async fn run(app: Arc<App>, args: Vec<String>) -> i32 {
    let line = args.join(" ");
    let parsed = match parse_complete(&line) {
        Ok(parsed) => parsed,
        Err(error) => {
            eprintln!("{} {error}", "error:".red().bold());
            return exit::USAGE;
        }
    };
    if parsed.command.is_empty() {
        return exit::USAGE;
    }

    let ctx = app.execution_context();
    let code = match app.queue.enqueue(parsed, ctx, Priority::Normal) {
        Ok(ticket) => match app.queue.await_result(ticket).await {
            Ok(output) => {
                if !output.stdout.is_empty() {
                    print!("{}", output.stdout);
                }
                if !output.stderr.is_empty() {
                    eprint!("{}", output.stderr);
                }
                output.exit_code.unwrap_or(exit::SUCCESS)
            }
            Err(error) => {
                eprintln!("{} {error}", "error:".red().bold());
                exit::code_for(&error)
            }
        },
        Err(error) => {
            eprintln!("{} {error}", "error:".red().bold());
            exit::code_for(&error)
        }
    };

    app.shutdown().await;
    code
}
