//! Wire message types.
//!
//! Requests, the command table, sync dumps and reply frames. Everything here
//! is a single JSON document; framing lives in [`crate::transport`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, SyncError};
use crate::protocol::MergeReport;

/// Reply to `ping`, sent as a line.
pub const PONG: &[u8] = b"pong";

/// A request frame: `{"command": <name>, "args": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub command: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Request {
    pub fn ping() -> Self {
        Self {
            command: "ping".into(),
            args: Vec::new(),
        }
    }

    pub fn sync() -> Self {
        Self {
            command: "sync".into(),
            args: Vec::new(),
        }
    }

    /// Parse a request frame, reporting exactly what is wrong with it.
    pub fn parse(frame: &[u8]) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_slice(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let Value::Object(mut object) = value else {
            return Err(ProtocolError::Malformed("request must be a JSON object".into()));
        };

        let command = match object.remove("command") {
            Some(Value::String(command)) => command,
            Some(_) => {
                return Err(ProtocolError::Malformed("command must be a string".into()));
            }
            None => return Err(ProtocolError::MissingCommand),
        };

        let args = match object.remove("args") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(args)) => args,
            Some(_) => {
                return Err(ProtocolError::InvalidArgs {
                    command,
                    reason: "args must be an array".into(),
                });
            }
        };

        Ok(Self { command, args })
    }
}

/// Optional hints a caller may attach to `sync`: `[hashsum, host, port]`.
///
/// Parsed only so it can be logged. The responder deliberately ignores it:
/// a sync answer never depends on who is asking, so nothing should read
/// these fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncHint {
    pub hashsum: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl SyncHint {
    fn from_args(args: &[Value]) -> Self {
        Self {
            hashsum: args.first().and_then(Value::as_str).map(String::from),
            host: args.get(1).and_then(Value::as_str).map(String::from),
            port: args
                .get(2)
                .and_then(Value::as_u64)
                .and_then(|p| u16::try_from(p).ok()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// The command table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Liveness check, answered with [`PONG`].
    Ping,
    /// Start the responder half of a sync exchange.
    Sync(SyncHint),
}

impl Command {
    /// Resolve a request against the command table.
    pub fn from_request(request: Request) -> Result<Self, ProtocolError> {
        match request.command.as_str() {
            "ping" => {
                if !request.args.is_empty() {
                    return Err(ProtocolError::InvalidArgs {
                        command: request.command,
                        reason: format!("expected 0 arguments, got {}", request.args.len()),
                    });
                }
                Ok(Command::Ping)
            }
            "sync" => Ok(Command::Sync(SyncHint::from_args(&request.args))),
            _ => Err(ProtocolError::UnknownCommand(request.command)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping => "ping",
            Command::Sync(_) => "sync",
        }
    }
}

/// Full-state dump: every record projected to its hashable fields.
///
/// Rows stay as raw JSON so one bad row can be skipped without rejecting the
/// rest. Unknown entity kinds are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncDump {
    #[serde(rename = "Peer", default)]
    pub peers: Vec<Value>,
    #[serde(rename = "Message", default)]
    pub messages: Vec<Value>,
}

impl SyncDump {
    pub fn len(&self) -> usize {
        self.peers.len() + self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Responder's acknowledgment of a pushed dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeAck {
    pub merged: MergeReport,
}

/// Body of an error frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// `{"error": {"code": ..., "message": ...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: ErrorBody,
}

impl From<&SyncError> for ErrorFrame {
    fn from(e: &SyncError) -> Self {
        Self {
            error: ErrorBody {
                code: e.code().to_string(),
                message: e.to_string(),
            },
        }
    }
}

/// Decode a reply frame, turning a peer's error frame into [`SyncError::PeerError`].
pub fn parse_reply<T: DeserializeOwned>(frame: &[u8]) -> Result<T, SyncError> {
    let value: Value =
        serde_json::from_slice(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    if value.get("error").is_some() {
        let ErrorFrame { error } = serde_json::from_value(value)
            .map_err(|e| ProtocolError::Malformed(format!("bad error frame: {e}")))?;
        return Err(SyncError::PeerError {
            code: error.code,
            message: error.message,
        });
    }

    Ok(serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))?)
}
