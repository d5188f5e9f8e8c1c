//! # Console Command Parsing
//!
//! One line of operator input becomes one [`ConsoleCommand`].
//!
//! ```text
//! drag "Schulter Horizontal" 35      names with spaces are double-quoted
//! release "Schulter Horizontal"      send the dragged angle
//! fine Ellbogen                      opens ticket #1
//! delta 1 -2.5                       resolves it (or: delta 1 cancel)
//! ```

use servo_core::validation::parse_angle;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("unclosed quote")]
    UnclosedQuote,

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    List,
    Drag { name: String, angle: f64 },
    Release { name: String },
    Set { name: String, angle: f64 },
    Zero { name: String },
    Enable { name: String, enable: bool },
    Fine { name: String },
    /// `None` cancels the ticket.
    Delta { ticket: u64, response: Option<String> },
    EnableAll { enable: bool },
    ZeroAll,
    Wave,
    Stop { confirmed: bool },
    Refresh,
    PresetSave { name: String },
    PresetLoad { name: String },
    PresetDelete { name: String },
    Presets,
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  list                          show every servo
  drag <name> <deg>             move the slider (not sent)
  release <name>                send the dragged angle
  set <name> <deg>              type an angle and send it
  zero <name>                   send 0 degrees
  enable <name> | disable <name>
  fine <name>                   open a fine-tune ticket
  delta <ticket> <value|cancel> answer a fine-tune ticket
  enable-all | disable-all | zero-all | wave | refresh
  stop confirm                  emergency stop
  preset save|load|delete <name>
  presets                       list saved presets
  status | help | quit";

/// Splits on whitespace, keeping double-quoted runs together.
pub fn tokenize(line: &str) -> Result<Vec<String>, ParseError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quoted = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                quoted = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() || quoted {
                    tokens.push(std::mem::take(&mut current));
                }
                quoted = false;
            }
            c => current.push(c),
        }
    }

    if in_quotes {
        return Err(ParseError::UnclosedQuote);
    }
    if !current.is_empty() || quoted {
        tokens.push(current);
    }
    Ok(tokens)
}

fn angle(text: &str) -> Result<f64, ParseError> {
    parse_angle(text).map_err(|e| ParseError::Invalid(e.to_string()))
}

/// Parses one line. Blank lines are `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<ConsoleCommand>, ParseError> {
    let tokens = tokenize(line)?;
    let Some((head, rest)) = tokens.split_first() else {
        return Ok(None);
    };
    let args: Vec<&str> = rest.iter().map(String::as_str).collect();

    let command = match (head.to_lowercase().as_str(), args.as_slice()) {
        ("list" | "ls", []) => ConsoleCommand::List,
        ("drag", [name, deg]) => ConsoleCommand::Drag {
            name: name.to_string(),
            angle: angle(deg)?,
        },
        ("drag", _) => return Err(ParseError::Usage("drag <name> <deg>")),
        ("release", [name]) => ConsoleCommand::Release { name: name.to_string() },
        ("release", _) => return Err(ParseError::Usage("release <name>")),
        ("set", [name, deg]) => ConsoleCommand::Set {
            name: name.to_string(),
            angle: angle(deg)?,
        },
        ("set", _) => return Err(ParseError::Usage("set <name> <deg>")),
        ("zero", [name]) => ConsoleCommand::Zero { name: name.to_string() },
        ("zero", _) => return Err(ParseError::Usage("zero <name>")),
        ("enable", [name]) => ConsoleCommand::Enable {
            name: name.to_string(),
            enable: true,
        },
        ("disable", [name]) => ConsoleCommand::Enable {
            name: name.to_string(),
            enable: false,
        },
        ("enable" | "disable", _) => return Err(ParseError::Usage("enable|disable <name>")),
        ("fine", [name]) => ConsoleCommand::Fine { name: name.to_string() },
        ("fine", _) => return Err(ParseError::Usage("fine <name>")),
        ("delta", [ticket, response]) => {
            let ticket = ticket
                .trim_start_matches('#')
                .parse()
                .map_err(|_| ParseError::Invalid(format!("'{}' is not a ticket number", ticket)))?;
            let response = match response.to_lowercase().as_str() {
                "cancel" => None,
                _ => Some(response.to_string()),
            };
            ConsoleCommand::Delta { ticket, response }
        }
        ("delta", _) => return Err(ParseError::Usage("delta <ticket> <value|cancel>")),
        ("enable-all", []) => ConsoleCommand::EnableAll { enable: true },
        ("disable-all", []) => ConsoleCommand::EnableAll { enable: false },
        ("zero-all", []) => ConsoleCommand::ZeroAll,
        ("wave", []) => ConsoleCommand::Wave,
        ("stop", []) => ConsoleCommand::Stop { confirmed: false },
        ("stop", ["confirm"]) => ConsoleCommand::Stop { confirmed: true },
        ("refresh", []) => ConsoleCommand::Refresh,
        ("preset", ["save", name]) => ConsoleCommand::PresetSave { name: name.to_string() },
        ("preset", ["load", name]) => ConsoleCommand::PresetLoad { name: name.to_string() },
        ("preset", ["delete", name]) => ConsoleCommand::PresetDelete { name: name.to_string() },
        ("preset", _) => return Err(ParseError::Usage("preset save|load|delete <name>")),
        ("presets", []) => ConsoleCommand::Presets,
        ("status", []) => ConsoleCommand::Status,
        ("help" | "?", _) => ConsoleCommand::Help,
        ("quit" | "exit", []) => ConsoleCommand::Quit,
        (other, _) => return Err(ParseError::Unknown(other.to_string())),
    };

    Ok(Some(command))
}
