//! Cloud-side vocabulary for climate-hub.
//!
//! - [`CloudClient`] -- the async seam the sync engine drives: discovery,
//!   state fetch, command submission, push channel, re-authentication.
//! - [`model`] -- wire types ([`RemoteState`] in tenths of a degree,
//!   [`PushEvent`], [`CommandKind`], ...).
//! - [`params`] -- vendor parameter names and value codes.
//! - [`relay`] -- a WebSocket push-relay channel implementation.
//! - [`Error`] -- the failure taxonomy every client reports through.

pub mod client;
pub mod error;
pub mod model;
pub mod params;
pub mod relay;

// ── Primary re-exports ──
pub use client::{CloudClient, PushStream};
pub use error::Error;
pub use model::{
    CommandAck, CommandKind, CommandPayload, DeviceDescriptor, DeviceId, ParamMap, PushEvent,
    RemoteState,
};
pub use relay::Region;
