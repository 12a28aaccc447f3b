//! Control-channel grammar
//!
//! - `STATE`: report the current state tag
//! - `GOTO <state> [input...]`: transition, acknowledged once the script is launched
//! - `WAIT <state> [input...]`: transition, acknowledged once the script finished or was killed
//!
//! Everything after the target is passed verbatim to the script as `$INPUT`.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty command")]
    Empty,

    #[error("invalid command {0:?}")]
    Unknown(String),

    #[error("{0} requires a target state")]
    MissingTarget(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    State,
    Goto { target: String, input: String },
    Wait { target: String, input: String },
}

impl Command {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let line = raw.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }

        let mut tokens = line.splitn(3, ' ');
        let verb = tokens.next().unwrap_or_default();
        match verb {
            "STATE" => Ok(Command::State),
            "GOTO" | "WAIT" => {
                let verb = if verb == "GOTO" { "GOTO" } else { "WAIT" };
                let target = tokens
                    .next()
                    .filter(|target| !target.is_empty())
                    .ok_or(ProtocolError::MissingTarget(verb))?
                    .to_string();
                let input = tokens.next().unwrap_or_default().to_string();
                Ok(if verb == "GOTO" {
                    Command::Goto { target, input }
                } else {
                    Command::Wait { target, input }
                })
            }
            other => Err(ProtocolError::Unknown(other.to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (verb, target, input) = match self {
            Command::State => return f.write_str("STATE"),
            Command::Goto { target, input } => ("GOTO", target, input),
            Command::Wait { target, input } => ("WAIT", target, input),
        };
        if input.is_empty() {
            write!(f, "{verb} {target}")
        } else {
            write!(f, "{verb} {target} {input}")
        }
    }
}
