//! Signaling protocol messages
//!
//! Server-originated messages are serialized here. Client messages are never
//! re-encoded: the relay only inspects the `type` tag and passes the original
//! text through byte-for-byte.

use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// Message types relayed verbatim to the other peer
pub const SIGNAL_TYPES: [&str; 4] = ["register", "offer", "answer", "ice-candidate"];

/// Messages originated by the server
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Occupancy update sent on join and in reply to `request-peer-count`
    PeerJoined { peer_count: usize, max_peers: usize },

    /// A peer disconnected from the session
    PeerLeft { peer_count: usize },

    /// Reply to a client `ping`
    Pong,
}

impl ServerMessage {
    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Classification of an inbound client message by its `type` tag
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientKind {
    /// Keepalive, answered directly with `pong`
    Ping,
    /// Occupancy query, answered directly with a `peer-joined` shape
    RequestPeerCount,
    /// Allowlisted signaling type, relayed verbatim to the other peer
    Signal,
    /// Anything else: discarded, connection stays open
    Unknown(String),
}

/// Classify an inbound message without touching its payload
///
/// Returns an error only when the text is not a JSON object at all; a JSON
/// object with a missing or non-string `type` classifies as `Unknown`.
pub fn classify(text: &str) -> Result<ClientKind, serde_json::Error> {
    #[derive(Deserialize)]
    struct Envelope {
        #[serde(rename = "type", default)]
        kind: Option<String>,
    }

    let envelope: Envelope = serde_json::from_str(text)?;
    Ok(match envelope.kind.as_deref() {
        Some("ping") => ClientKind::Ping,
        Some("request-peer-count") => ClientKind::RequestPeerCount,
        Some(kind) if SIGNAL_TYPES.contains(&kind) => ClientKind::Signal,
        Some(kind) => ClientKind::Unknown(kind.to_string()),
        None => ClientKind::Unknown("<missing>".to_string()),
    })
}

/// Distinct close signals sent when a channel is refused or reclaimed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Session id failed the format constraint
    InvalidSessionId,
    /// Session already holds the maximum number of peers
    SessionFull,
    /// Presented join token does not match
    Unauthorized,
    /// Session exceeded the hard age ceiling
    Expired,
}

impl CloseReason {
    /// WebSocket close code for this reason
    pub fn code(self) -> CloseCode {
        match self {
            CloseReason::Expired => CloseCode::Away,
            _ => CloseCode::Policy,
        }
    }

    /// Human-readable reason string sent in the close frame
    pub fn reason(self) -> &'static str {
        match self {
            CloseReason::InvalidSessionId => "Invalid session ID",
            CloseReason::SessionFull => "Session full",
            CloseReason::Unauthorized => "Unauthorized",
            CloseReason::Expired => "Session expired",
        }
    }

    /// Build the close message for this reason
    pub fn message(self) -> Message {
        Message::Close(Some(CloseFrame {
            code: self.code(),
            reason: self.reason().into(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_message_serialization() {
        let msg = ServerMessage::PeerJoined {
            peer_count: 2,
            max_peers: 2,
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"peer-joined""#));
        assert!(json.contains(r#""peer_count":2"#));

        let msg = ServerMessage::PeerLeft { peer_count: 1 };
        assert!(msg.to_json().unwrap().contains(r#""type":"peer-left""#));

        assert_eq!(ServerMessage::Pong.to_json().unwrap(), r#"{"type":"pong"}"#);
    }

    #[test]
    fn test_classify_signaling_types() {
        for kind in SIGNAL_TYPES {
            let text = format!(r#"{{"type":"{}","payload":"x"}}"#, kind);
            assert_eq!(classify(&text).unwrap(), ClientKind::Signal);
        }
    }

    #[test]
    fn test_classify_direct_replies() {
        assert_eq!(classify(r#"{"type":"ping"}"#).unwrap(), ClientKind::Ping);
        assert_eq!(
            classify(r#"{"type":"request-peer-count"}"#).unwrap(),
            ClientKind::RequestPeerCount
        );
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(
            classify(r#"{"type":"file-chunk","data":"..."}"#).unwrap(),
            ClientKind::Unknown("file-chunk".to_string())
        );
        // Missing type tag is unknown, not malformed
        assert!(matches!(
            classify(r#"{"payload":"x"}"#).unwrap(),
            ClientKind::Unknown(_)
        ));
    }

    #[test]
    fn test_classify_malformed() {
        assert!(classify("not json").is_err());
        assert!(classify("").is_err());
    }

    #[test]
    fn test_close_reasons_distinct() {
        assert_eq!(CloseReason::Unauthorized.code(), CloseCode::Policy);
        assert_eq!(CloseReason::Expired.code(), CloseCode::Away);
        assert_ne!(
            CloseReason::SessionFull.reason(),
            CloseReason::Unauthorized.reason()
        );
    }
}
