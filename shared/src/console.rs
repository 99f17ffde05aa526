//! Line-oriented operator console
//!
//! ```text
//! press X Y | drag X Y | release [align] | veil X Y
//! next | prev | show | say TEXT... | quit
//! ```

use crate::bus::EventObserver;
use crate::interaction::LocalCommand;
use crate::session::SessionMessage;
use crate::store::{Event, Store};
use log::{debug, error, info};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleInput {
    Command(LocalCommand),
    Quit,
    Empty,
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("{command} expects {expected}")]
    Usage {
        command: &'static str,
        expected: &'static str,
    },
    #[error("{0:?} is not a number")]
    NotANumber(String),
}

pub const HELP: &str = "commands: press X Y, drag X Y, release [align], veil X Y, next, prev, show, say TEXT, quit";

pub fn parse_line(line: &str) -> Result<ConsoleInput, ParseError> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "" => return Ok(ConsoleInput::Empty),
        "quit" | "exit" => return Ok(ConsoleInput::Quit),
        "press" => {
            let (x, y) = point("press", rest)?;
            LocalCommand::Press { x, y }
        }
        "drag" => {
            let (x, y) = point("drag", rest)?;
            LocalCommand::DragTo { x, y }
        }
        "veil" => {
            let (x, y) = point("veil", rest)?;
            LocalCommand::ToggleVeil { x, y }
        }
        "release" => match rest {
            "" => LocalCommand::Release { align: false },
            "align" => LocalCommand::Release { align: true },
            _ => {
                return Err(ParseError::Usage {
                    command: "release",
                    expected: "nothing or `align`",
                })
            }
        },
        "next" => LocalCommand::NextPage,
        "prev" => LocalCommand::PrevPage,
        "show" => LocalCommand::ShowPageToPlayers,
        "say" => {
            if rest.is_empty() {
                return Err(ParseError::Usage {
                    command: "say",
                    expected: "some text",
                });
            }
            LocalCommand::Chat(rest.to_string())
        }
        other => return Err(ParseError::UnknownCommand(other.to_string())),
    };
    Ok(ConsoleInput::Command(command))
}

fn point(command: &'static str, args: &str) -> Result<(f64, f64), ParseError> {
    let usage = ParseError::Usage {
        command,
        expected: "two coordinates",
    };
    let mut parts = args.split_whitespace();
    let (Some(x), Some(y), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(usage);
    };
    Ok((number(x)?, number(y)?))
}

fn number(text: &str) -> Result<f64, ParseError> {
    text.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| ParseError::NotANumber(text.to_string()))
}

/// Feeds stdin lines into the session until `quit` or end of input.
///
/// End of input only stops the console; the session keeps running.
pub async fn read_stdin(session_tx: mpsc::UnboundedSender<SessionMessage>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("Console input closed");
                break;
            }
            Err(e) => {
                error!("Error reading console: {}", e);
                break;
            }
        };

        let message = match parse_line(&line) {
            Ok(ConsoleInput::Command(command)) => SessionMessage::Local(command),
            Ok(ConsoleInput::Quit) => SessionMessage::Shutdown,
            Ok(ConsoleInput::Empty) => continue,
            Err(e) => {
                eprintln!("{}\n{}", e, HELP);
                continue;
            }
        };

        let quit = matches!(message, SessionMessage::Shutdown);
        if session_tx.send(message).is_err() || quit {
            break;
        }
    }
}

/// Prints what the operator would otherwise see on the map
#[derive(Debug, Default)]
pub struct ConsoleEcho;

impl EventObserver for ConsoleEcho {
    fn on_event(&mut self, event: &Event, store: &Store) {
        match event {
            Event::NewChat(entry) => println!("[{}] {}", entry.speaker(), entry.text),
            Event::PageChanged(page) => println!("players now see page {}", page),
            Event::TokenUpdated(id) => {
                if let Ok(view) = store.token(id) {
                    let (x, y) = view.position();
                    info!("{} moved to ({}, {})", id, x, y);
                }
            }
            Event::VeilsUpdated { page_id, veils } => {
                let covered = veils.iter().filter(|v| v.covered).count();
                info!("Page {}: {} of {} veils covered", page_id, covered, veils.len());
            }
            Event::TokenTempPositionChanged { .. } => {}
        }
    }
}
