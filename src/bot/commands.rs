use std::fmt;

use super::gateway::Guard;
use crate::{audio::session::SessionStatus, sources::Track};

/// Text commands understood by the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Hello,
    Join,
    Leave,
    Play(String),
    Skip,
    Clean,
    Queue,
    /// 1-based queue positions, as typed by the user.
    Move { from: usize, to: usize },
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Unknown(String),
    Usage(&'static str),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Unknown(name) => write!(f, "Unknown command: {}", name),
            ParseError::Usage(usage) => write!(f, "Usage: {}", usage),
        }
    }
}

impl Command {
    /// Parses a chat message. `None` if it does not start with `prefix`.
    pub fn parse(content: &str, prefix: &str) -> Option<Result<Self, ParseError>> {
        let body = content.trim_start().strip_prefix(prefix)?;
        let (name, args) = match body.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (body, ""),
        };

        if name.is_empty() {
            return None;
        }

        let command = match name.to_lowercase().as_str() {
            "hello" => Ok(Command::Hello),
            "join" | "j" => Ok(Command::Join),
            "leave" | "l" | "kys" => Ok(Command::Leave),
            "play" | "stream" | "p" => {
                if args.is_empty() {
                    Err(ParseError::Usage("play <url or search terms>"))
                } else {
                    Ok(Command::Play(args.to_string()))
                }
            }
            "skip" | "s" => Ok(Command::Skip),
            "clean" | "clear" | "c" => Ok(Command::Clean),
            "queue" | "q" => Ok(Command::Queue),
            "move" | "m" => parse_move(args),
            "status" | "np" => Ok(Command::Status),
            other => Err(ParseError::Unknown(other.to_string())),
        };

        Some(command)
    }

    /// Checks that must pass, in order, before the command reaches a session.
    pub fn guards(&self) -> &'static [Guard] {
        match self {
            Command::Hello | Command::Clean => &[],
            Command::Join => &[Guard::CallerInVoice, Guard::NotAlreadyConnected],
            Command::Play(_) => &[Guard::CallerInVoice],
            Command::Skip | Command::Queue | Command::Move { .. } | Command::Status => {
                &[Guard::CallerInVoice, Guard::SharesChannelWithBot]
            }
            Command::Leave => &[Guard::BotConnected],
        }
    }

    /// Whether the invoking message is deleted once the command is done.
    pub fn deletes_invocation(&self) -> bool {
        !matches!(self, Command::Hello)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Hello => "hello",
            Command::Join => "join",
            Command::Leave => "leave",
            Command::Play(_) => "play",
            Command::Skip => "skip",
            Command::Clean => "clean",
            Command::Queue => "queue",
            Command::Move { .. } => "move",
            Command::Status => "status",
        }
    }
}

fn parse_move(args: &str) -> Result<Command, ParseError> {
    const USAGE: &str = "move <from> <to>";

    let mut positions = args.split_whitespace().map(str::parse::<usize>);
    match (positions.next(), positions.next(), positions.next()) {
        (Some(Ok(from)), Some(Ok(to)), None) => Ok(Command::Move { from, to }),
        _ => Err(ParseError::Usage(USAGE)),
    }
}

/// Numbered listing of the first `limit` queued tracks plus an overflow line.
pub fn format_queue(tracks: &[Track], limit: usize) -> String {
    if tracks.is_empty() {
        return "The queue is empty.".to_string();
    }

    let mut message = String::from("Songs in queue:\n");
    for (position, track) in tracks.iter().take(limit).enumerate() {
        message.push_str(&format!("{}. {}\n", position + 1, track.title()));
    }

    if tracks.len() > limit {
        message.push_str(&format!("And {} more.", tracks.len() - limit));
    }

    message.trim_end().to_string()
}

pub fn format_status(status: &SessionStatus) -> String {
    let current = match &status.current {
        Some(track) => format!("Now playing: {}", track.title()),
        None => "Nothing is playing.".to_string(),
    };

    format!("{}\nSongs in queue: {}", current, status.queue_len)
}
