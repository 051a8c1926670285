// crates/deskrelay-relay/src/session.rs
// ============================================================================
// Module: Relay Session
// Description: Message protocol shared by the stdio and WebSocket transports.
// Purpose: Authenticate once per connection, then serve catalog and calls.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A session starts unauthenticated. The first message must be
//! `{"type": "auth", "token": ...}`; anything else, or a wrong token, gets an
//! error reply and the connection is closed. Afterwards the client may send:
//!
//! - `{"type": "list_tools", "id"?}` answered with `{"type": "tools", ...}`;
//! - `{"type": "execute", "id"?, "tool", "arguments"?}` answered with
//!   `{"type": "result", "id", "tool", "result"}`, where `result` is the
//!   normalized body for success and failure alike.
//!
//! Protocol errors are `{"type": "error", "id"?, "error_kind", "error"}`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use deskrelay_core::ErrorKind;
use deskrelay_core::FailureReport;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;

use crate::relay::Relay;

// ============================================================================
// SECTION: Messages
// ============================================================================

/// Client-to-relay message.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authentication handshake.
    Auth {
        /// Orchestration-facing token.
        token: String,
    },
    /// Catalog request.
    ListTools {
        /// Correlation id echoed in the reply.
        #[serde(default)]
        id: Option<Value>,
    },
    /// Tool call.
    Execute {
        /// Correlation id echoed in the reply.
        #[serde(default)]
        id: Option<Value>,
        /// Tool name.
        tool: String,
        /// Tool arguments.
        #[serde(default)]
        arguments: Value,
    },
}

/// Reply to one client message.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReply {
    /// Message to send back.
    pub message: Value,
    /// Close the connection after sending.
    pub close: bool,
}

impl SessionReply {
    /// Reply that keeps the connection open.
    const fn open(message: Value) -> Self {
        Self {
            message,
            close: false,
        }
    }

    /// Error reply; opaque kinds also close the connection.
    fn error(id: Option<Value>, kind: ErrorKind, message: impl Into<String>) -> Self {
        let report = FailureReport::new(kind, message);
        Self {
            message: json!({
                "type": "error",
                "id": id,
                "error_kind": report.error_kind,
                "error": report.error,
            }),
            close: kind == ErrorKind::Unauthenticated,
        }
    }
}

// ============================================================================
// SECTION: Session
// ============================================================================

/// Per-connection protocol state.
pub struct Session<'a> {
    /// Shared relay.
    relay: &'a Relay,
    /// True after a successful handshake.
    authenticated: bool,
}

impl<'a> Session<'a> {
    /// Starts an unauthenticated session.
    #[must_use]
    pub const fn new(relay: &'a Relay) -> Self {
        Self {
            relay,
            authenticated: false,
        }
    }

    /// Returns true after a successful handshake.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Handles one raw message.
    pub async fn handle(&mut self, bytes: &[u8]) -> SessionReply {
        if bytes.len() > self.relay.max_frame_bytes() {
            return SessionReply {
                close: true,
                ..SessionReply::error(None, ErrorKind::InvalidRequest, "message too large")
            };
        }
        let message = match serde_json::from_slice::<ClientMessage>(bytes) {
            Ok(message) => message,
            Err(err) if self.authenticated => {
                let detail = format!("invalid message: {err}");
                return SessionReply::error(None, ErrorKind::InvalidRequest, detail);
            }
            Err(_) => return SessionReply::error(None, ErrorKind::Unauthenticated, "handshake required"),
        };
        match message {
            ClientMessage::Auth {
                token,
            } => {
                if self.relay.authenticate(&token) {
                    self.authenticated = true;
                    SessionReply::open(json!({"type": "auth_result", "success": true}))
                } else {
                    self.authenticated = false;
                    SessionReply::error(None, ErrorKind::Unauthenticated, "invalid token")
                }
            }
            ClientMessage::ListTools {
                id,
            } => {
                if !self.authenticated {
                    return SessionReply::error(id, ErrorKind::Unauthenticated, "handshake required");
                }
                let mut tools = self.relay.list_tools();
                if let Value::Object(fields) = &mut tools {
                    fields.insert("type".to_string(), Value::String("tools".to_string()));
                    fields.insert("id".to_string(), id.unwrap_or(Value::Null));
                }
                SessionReply::open(tools)
            }
            ClientMessage::Execute {
                id,
                tool,
                arguments,
            } => {
                if !self.authenticated {
                    return SessionReply::error(id, ErrorKind::Unauthenticated, "handshake required");
                }
                let (_, result) = self.relay.execute_normalized(&tool, arguments).await;
                SessionReply::open(json!({
                    "type": "result",
                    "id": id,
                    "tool": tool,
                    "result": result,
                }))
            }
        }
    }
}
