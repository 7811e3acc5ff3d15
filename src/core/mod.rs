//! Core types shared across the update agent.
//!
//! Currently this is the error taxonomy; see [`error`].

pub mod error;

pub use error::AgentError;
