//! Snatcher Core - Shared types, tokens, and configuration
//!
//! This crate contains the foundational pieces used by the StreamSnatcher
//! signaling server. It has no dependencies on networking code.

pub mod config;
pub mod error;
pub mod token;

pub use config::{Config, ServerConfig, SessionConfig};
pub use error::AdmissionError;
pub use token::{generate_join_token, generate_session_id, validate_session_id};

/// Default listener port
pub const DEFAULT_PORT: u16 = 8080;

/// Maximum peers per session (the protocol's capacity ceiling)
pub const MAX_PEERS_PER_SESSION: usize = 2;

/// Maximum signaling message size (64 KiB)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;
