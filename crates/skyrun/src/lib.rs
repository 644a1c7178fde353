//! Skyrun: drive a smart telescope over its line-delimited JSON protocol.
//!
//! The crate is organised around a long-lived [`session::DeviceSession`]
//! that owns the TCP link, a background [`listener::EventListener`] that
//! turns device events into operation state, and a
//! [`sequencer::Sequencer`] that walks a target list inside the night's
//! twilight window.
//!
//! ```text
//! Sequencer -> TargetRunner -> DeviceSession -> CommandCodec -> Transport
//!                                   ^                               |
//!                                   +---- OperationCell <- EventListener
//! ```

#![forbid(unsafe_code)]
// Library documentation is in progress. Public API types have docs;
// internal types will be documented in future releases.
#![allow(missing_docs)]

pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod listener;
pub mod model;
pub mod schedule;
pub mod sequencer;
pub mod session;
pub mod transport;
pub mod twilight;

pub use crate::error::{ErrorCode, ScopeError, ScopeResult};
pub use crate::model::*;
