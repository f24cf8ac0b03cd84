//! Parsing of one line of terminal input.

/// What a line typed at the prompt asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Anything that is not a slash command goes to the tutor as-is.
    Say(String),
    Next,
    Previous,
    /// Zero-based step index.
    Jump(usize),
    Reset,
    Back,
    Hint,
    Explain(String),
    Encourage,
    Progress,
    Help,
    Quit,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command '/{0}'. Type /help for the list of commands.")]
    Unknown(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
}

pub const HELP: &str = "\
Type your answer or question and press enter.

  /next              move to the next step
  /prev              go back one step
  /jump N            go to step N
  /reset             start the lesson over
  /back              return to the lesson after a side question
  /hint              ask for a hint
  /explain CONCEPT   ask for an explanation
  /encourage         ask for a pep talk
  /progress          show how far you are
  /quit              save and leave";

/// Parses a line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Say(line.to_string())));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let command = match name.to_lowercase().as_str() {
        "next" | "n" => Command::Next,
        "prev" | "previous" | "p" => Command::Previous,
        "jump" | "j" => {
            let number: usize = arg.parse().map_err(|_| CommandError::Usage("/jump N"))?;
            if number == 0 {
                return Err(CommandError::Usage("/jump N (steps start at 1)"));
            }
            Command::Jump(number - 1)
        }
        "reset" => Command::Reset,
        "back" => Command::Back,
        "hint" | "h" => Command::Hint,
        "explain" => {
            if arg.is_empty() {
                return Err(CommandError::Usage("/explain CONCEPT"));
            }
            Command::Explain(arg.to_string())
        }
        "encourage" => Command::Encourage,
        "progress" => Command::Progress,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}
