//! Shared credential helpers for the chat services
//!
//! - `jwt`: HS256 bearer token issuance and validation

pub mod jwt;
