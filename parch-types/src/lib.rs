//! # parch-types
//!
//! Wire format types for the Parch federated chat relay.
//!
//! This crate provides the types shared by the relay, host backends and
//! clients:
//! - [`Frame`] - the JSON `{"type", "data"}` envelope every socket message uses
//! - [`MessageType`] - the known frame type names
//! - Payload structs for the handshakes and relay-interpreted actions
//! - [`CapabilityClaims`] and [`Scope`] - host-signed authorization claims
//! - [`SessionId`] - relay-assigned session identifiers
//! - [`TypesError`] - error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod capability;
mod error;
mod frame;
mod ids;
mod messages;

pub use capability::{CapabilityClaims, Scope, CAPABILITY_VERSION, WILDCARD_CHANNEL};
pub use error::TypesError;
pub use frame::{Frame, MessageType};
pub use ids::SessionId;
pub use messages::{
    ActionRequest, AuthChallenge, AuthPubkey, AuthPubkeySuccess, AuthorResponse, Chat,
    ErrorPayload, HealthCheck, HostAuth, HostAuthChallenge, HostAuthSuccess, JoinChannel,
    JoinHost, JoinHostSuccess, UpdateUsername, AUTHOR_ROLE,
};
