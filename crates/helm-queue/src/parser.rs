//! Command-line tokenizing: quoted arguments, nestable escapes, and
//! trailing-backslash line continuation (spec.md §4.H).

use helm_errors::HelmError;

/// A parsed command line: the command name and its argument vector. Never
/// re-interpolated through a shell.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedCommand {
    /// The command (first token), empty for a blank line.
    pub command: String,
    /// The remaining tokens.
    pub args: Vec<String>,
}

/// Result of feeding one line to the accumulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// The line (or accumulated lines) form a complete command.
    Complete(ParsedCommand),
    /// The line ended in an unescaped backslash; more input is needed.
    NeedsContinuation,
}

/// Accumulates lines across a trailing-backslash continuation until a
/// complete command is available. A fresh accumulator is created per
/// command; feed lines to it until it returns `Complete`.
#[derive(Debug, Default)]
pub struct CommandParser {
    buffer: String,
}

impl CommandParser {
    /// A parser with an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a continuation is pending (a prior line ended in an
    /// unescaped backslash and we're waiting on more input).
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Feed one line (without its trailing newline) to the parser.
    pub fn feed(&mut self, line: &str) -> Result<ParseOutcome, HelmError> {
        let trailing_backslashes = line.chars().rev().take_while(|&c| c == '\\').count();
        if trailing_backslashes % 2 == 1 {
            if !self.buffer.is_empty() {
                self.buffer.push(' ');
            }
            self.buffer.push_str(&line[..line.len() - 1]);
            return Ok(ParseOutcome::NeedsContinuation);
        }

        if !self.buffer.is_empty() {
            self.buffer.push(' ');
        }
        self.buffer.push_str(line);
        let parsed = parse_complete(&self.buffer)?;
        self.buffer.clear();
        Ok(ParseOutcome::Complete(parsed))
    }
}

/// Parse a single, already-joined logical line with no continuation
/// pending.
pub fn parse_complete(line: &str) -> Result<ParsedCommand, HelmError> {
    let tokens = tokenize(line)?;
    let mut iter = tokens.into_iter();
    let command = iter.next().unwrap_or_default();
    let args = iter.collect();
    Ok(ParsedCommand { command, args })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum QuoteState {
    None,
    Single,
    Double,
}

fn tokenize(line: &str) -> Result<Vec<String>, HelmError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote = QuoteState::None;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            QuoteState::None => match c {
                ' ' | '\t' => {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                '\'' => {
                    quote = QuoteState::Single;
                    in_token = true;
                }
                '"' => {
                    quote = QuoteState::Double;
                    in_token = true;
                }
                '\\' => {
                    in_token = true;
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                }
                _ => {
                    in_token = true;
                    current.push(c);
                }
            },
            QuoteState::Single => match c {
                '\\' if matches!(chars.peek(), Some('\'') | Some('\\')) => {
                    current.push(chars.next().expect("peeked"));
                }
                '\'' => quote = QuoteState::None,
                _ => current.push(c),
            },
            QuoteState::Double => match c {
                '\\' if matches!(chars.peek(), Some('"') | Some('\\')) => {
                    current.push(chars.next().expect("peeked"));
                }
                '"' => quote = QuoteState::None,
                _ => current.push(c),
            },
        }
    }

    if quote != QuoteState::None {
        return Err(HelmError::SchemaError("unterminated quote in command line".to_string()));
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_line_parses_to_empty_command() {
        let parsed = parse_complete("   ").unwrap();
        assert_eq!(parsed, ParsedCommand::default());
    }

    #[test]
    fn splits_on_whitespace() {
        let parsed = parse_complete("select  1  2").unwrap();
        assert_eq!(parsed.command, "select");
        assert_eq!(parsed.args, vec!["1", "2"]);
    }

    #[test]
    fn double_quoted_argument_keeps_spaces() {
        let parsed = parse_complete(r#"echo "hello world""#).unwrap();
        assert_eq!(parsed.args, vec!["hello world"]);
    }

    #[test]
    fn nested_escape_inside_double_quotes() {
        let parsed = parse_complete(r#"echo "say \"hi\"""#).unwrap();
        assert_eq!(parsed.args, vec![r#"say "hi""#]);
    }

    #[test]
    fn nested_escape_inside_single_quotes() {
        let parsed = parse_complete(r"echo 'it\'s fine'").unwrap();
        assert_eq!(parsed.args, vec!["it's fine"]);
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        let result = parse_complete(r#"echo "oops"#);
        assert!(result.is_err());
    }

    #[test]
    fn trailing_backslash_continues_across_lines() {
        let mut parser = CommandParser::new();
        let outcome = parser.feed(r"echo one \").unwrap();
        assert_eq!(outcome, ParseOutcome::NeedsContinuation);
        let outcome = parser.feed("two").unwrap();
        match outcome {
            ParseOutcome::Complete(parsed) => {
                assert_eq!(parsed.command, "echo");
                assert_eq!(parsed.args, vec!["one", "two"]);
            }
            ParseOutcome::NeedsContinuation => panic!("expected completion"),
        }
    }

    #[test]
    fn escaped_backslash_at_end_does_not_continue() {
        let mut parser = CommandParser::new();
        let outcome = parser.feed(r"echo one\\").unwrap();
        assert_eq!(
            outcome,
            ParseOutcome::Complete(ParsedCommand {
                command: "echo".to_string(),
                args: vec![r"one\".to_string()],
            })
        );
    }
}
