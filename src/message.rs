//! Message protocol definitions
//!
//! Plain-text bidirectional protocol. Client lines are parsed into a closed
//! set of `Command` variants; server replies are `ServerMessage` values whose
//! `Display` output is the exact wire text.

use std::fmt;

use crate::error::ChatError;
use crate::types::Handle;

const PRIVATE_COMMAND: &str = "/private";

/// Command summary sent after the welcome and on `/help`
pub const HELP_TEXT: &str = "\n--- Available Commands ---\n\
/private <username> <message> - Send private message\n\
/users - List online users\n\
/help - Show this help\n\
Type normally for group chat\n\
--------------------------\n";

/// Client → Server command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Group message to everyone else
    Broadcast(String),
    /// Direct message to one handle
    PrivateMessage { target: Handle, text: String },
    /// List online handles
    ListUsers,
    /// Show the command summary
    Help,
    /// `/private` with missing arguments
    InvalidUsage,
}

impl Command {
    /// Parse one line of client input
    pub fn parse(line: &str) -> Self {
        let line = line.trim();

        if line == PRIVATE_COMMAND {
            return Command::InvalidUsage;
        }
        if let Some(rest) = line
            .strip_prefix(PRIVATE_COMMAND)
            .and_then(|rest| rest.strip_prefix(' '))
        {
            return Self::parse_private(rest);
        }

        match line {
            "/users" => Command::ListUsers,
            "/help" => Command::Help,
            _ => Command::Broadcast(line.to_string()),
        }
    }

    fn parse_private(args: &str) -> Self {
        let Some((target, text)) = args.split_once(' ') else {
            return Command::InvalidUsage;
        };
        if text.is_empty() {
            return Command::InvalidUsage;
        }
        match Handle::parse(target) {
            Ok(target) => Command::PrivateMessage {
                target,
                text: text.to_string(),
            },
            Err(_) => Command::InvalidUsage,
        }
    }
}

/// Server → Client message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Handshake accepted
    Welcome { handle: Handle },
    /// Someone registered
    Joined { handle: Handle },
    /// Someone left
    Left { handle: Handle },
    /// Group message
    Chat { from: Handle, text: String },
    /// Direct message
    Private { from: Handle, text: String },
    /// Direct message delivered
    Sent { to: Handle },
    /// Reply to `/users`
    UserList { handles: Vec<Handle> },
    /// Command summary
    Help,
    /// Sent to a client whose session is ending
    ConnectionClosed,
    /// Sent to every client on server shutdown
    ShuttingDown,
    /// Error reply
    Error { message: String },
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMessage::Welcome { handle } => {
                write!(f, "[SERVER] Welcome {}! You are connected.", handle)
            }
            ServerMessage::Joined { handle } => write!(f, "[SERVER] {} joined the chat", handle),
            ServerMessage::Left { handle } => write!(f, "[SERVER] {} left the chat", handle),
            ServerMessage::Chat { from, text } => write!(f, "{}: {}", from, text),
            ServerMessage::Private { from, text } => write!(f, "[PRIVATE] {}: {}", from, text),
            ServerMessage::Sent { to } => write!(f, "[SENT] Private message to {}", to),
            ServerMessage::UserList { handles } => {
                let names: Vec<&str> = handles.iter().map(Handle::as_str).collect();
                write!(
                    f,
                    "[SERVER] Online users ({}): {}",
                    handles.len(),
                    names.join(", ")
                )
            }
            ServerMessage::Help => f.write_str(HELP_TEXT),
            ServerMessage::ConnectionClosed => f.write_str("[SERVER] Connection closed"),
            ServerMessage::ShuttingDown => f.write_str("[SERVER] Server is shutting down"),
            ServerMessage::Error { message } => write!(f, "[ERROR] {}", message),
        }
    }
}

/// Convert ChatError to ServerMessage for client notification
impl From<&ChatError> for ServerMessage {
    fn from(err: &ChatError) -> Self {
        let message = match err {
            ChatError::DuplicateHandle(_) => "Username already taken. Please try another.".to_string(),
            ChatError::EmptyHandle => "Username cannot be empty.".to_string(),
            ChatError::TargetOffline(target) => format!("User '{}' is not online", target),
            ChatError::DeliveryFailure { target, .. } => {
                format!("Could not deliver message to {}", target)
            }
            ChatError::InvalidUsage => "Usage: /private <username> <message>".to_string(),
            ChatError::CapacityExceeded => "Server is full. Please try again later.".to_string(),
            // Connection-level errors are not reported to clients
            _ => "Internal error".to_string(),
        };
        ServerMessage::Error { message }
    }
}
