//! Domain types for the protocol engine.

mod client;

pub use client::{Client, ClientAuthMethod, ClientType, ClientValidationError, GrantType};
