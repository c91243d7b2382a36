//! StreamSnatcher Signaling Server
//!
//! WebSocket signaling relay for establishing direct WebRTC connections
//! between exactly two peers per session.
//!
//! # Protocol
//!
//! 1. The issuer endpoint creates a session id + join token pair
//! 2. Peer A connects to `/ws/{session_id}?token={join_token}`
//! 3. Peer B connects with the same id and token, locking the session
//! 4. Server relays offer/answer/ice-candidate messages between peers
//! 5. Peers establish a direct WebRTC data channel; the relay is done

pub mod lifecycle;
pub mod messages;
pub mod registry;
pub mod server;
pub mod session;

pub use messages::{CloseReason, ServerMessage};
pub use registry::Registry;
pub use server::SignalServer;
pub use session::{PeerHandle, Session};
