//! # P2P
//!
//! The node's peer-to-peer layer: framed wire protocol, peer registry with
//! reputation, request/response plumbing, header/body sync driver and
//! new-block propagation.
//!
//! One task pair per connection (reader + writer); the registry maps both
//! connection ids and peer identities to live connections. Responses are
//! correlated to requests by the frame's request id.

pub mod connection;
pub mod errors;
pub mod handler;
pub mod peers;
pub mod propagation;
pub mod reputation;
pub mod server;
pub mod sync;
pub mod wire;

pub use connection::Connection;
pub use errors::P2pError;
pub use peers::{PeerHandle, PeerRegistry};
pub use reputation::ReputationService;
pub use server::{P2pConfig, P2pContext, P2pService};
pub use sync::SyncDriver;
pub use wire::{Frame, Message, StatusPayload};
