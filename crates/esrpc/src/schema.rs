//! # Command Schemas
//!
//! The payload fields every known command must carry. A packet for a known
//! command with a missing field means client and engine disagree on the
//! protocol version, so it is reported as malformed rather than passed on.
//! Unknown commands are not checked here; dispatch decides what to do with them.

use espack::Map;

use crate::error::Error;
use crate::error::Result;
use crate::packet::Packet;

/// Which side starts a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to engine.
    Outbound,
    /// Engine to client.
    Inbound,
}

#[derive(Debug)]
pub struct CommandSchema {
    pub name: &'static str,
    pub direction: Direction,
    pub request: &'static [&'static str],
    pub response: &'static [&'static str],
}

const MESSAGES: &[&str] = &["errors", "warnings"];

pub const COMMANDS: &[CommandSchema] = &[
    CommandSchema { name: "build", direction: Direction::Outbound, request: &["key", "entries", "flags", "write", "context"], response: MESSAGES },
    CommandSchema { name: "rebuild", direction: Direction::Outbound, request: &["key"], response: MESSAGES },
    CommandSchema { name: "cancel", direction: Direction::Outbound, request: &["key"], response: &[] },
    CommandSchema { name: "dispose", direction: Direction::Outbound, request: &["key"], response: &[] },
    CommandSchema { name: "transform", direction: Direction::Outbound, request: &["flags", "inputFS", "input"], response: MESSAGES },
    CommandSchema { name: "format-msgs", direction: Direction::Outbound, request: &["messages", "isWarning"], response: &["messages"] },
    CommandSchema { name: "analyze-metafile", direction: Direction::Outbound, request: &["metafile"], response: &["result"] },
    CommandSchema { name: "resolve", direction: Direction::Outbound, request: &["key", "pluginName", "path"], response: MESSAGES },

    CommandSchema { name: "ping", direction: Direction::Inbound, request: &[], response: &[] },
    CommandSchema { name: "on-start", direction: Direction::Inbound, request: &["key"], response: MESSAGES },
    CommandSchema { name: "on-end", direction: Direction::Inbound, request: &["key", "value"], response: MESSAGES },
    CommandSchema { name: "on-resolve", direction: Direction::Inbound, request: &["key", "path", "namespace", "kind"], response: &[] },
    CommandSchema { name: "on-load", direction: Direction::Inbound, request: &["key", "path", "namespace"], response: &[] },
    CommandSchema { name: "on-dispose", direction: Direction::Inbound, request: &["key"], response: &[] },
];

/// Looks up a command by name.
pub fn lookup(name: &str) -> Option<&'static CommandSchema> {
    COMMANDS.iter().find(|c| c.name == name)
}

fn check_fields(command: &str, what: &str, payload: &Map, fields: &[&str]) -> Result<()> {
    match fields.iter().find(|f| !payload.contains_key(f)) {
        Some(missing) => Err(Error::MalformedPacket(format!(
            "{} for '{}' is missing field '{}'",
            what, command, missing
        ))),
        None => Ok(()),
    }
}

/// Checks a request packet against its command's schema.
pub fn validate_request(packet: &Packet) -> Result<()> {
    let Some(command) = packet.command() else {
        return Err(Error::MalformedPacket(format!("request {} has no command", packet.id)));
    };
    match lookup(command) {
        Some(schema) => check_fields(command, "request", &packet.payload, schema.request),
        None => Ok(()),
    }
}

/// Checks the response to `command`. Error responses are exempt, they carry
/// only the `error` entry.
pub fn validate_response(command: &str, payload: &Map) -> Result<()> {
    if payload.contains_key("error") {
        return Ok(());
    }
    match lookup(command) {
        Some(schema) => check_fields(command, "response", payload, schema.response),
        None => Ok(()),
    }
}
