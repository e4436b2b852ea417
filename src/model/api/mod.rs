//! API-compatible types.
//!
//! The types in this module are serialised in an API-friendly way:
//!
//! - Field names are camelCase.
//! - IDs are serialised as hex strings.
//! - Datetimes are serialised as RFC 3339 strings.

pub mod auth;
pub mod candidate;
pub mod election;
pub mod message;
pub mod vote;
