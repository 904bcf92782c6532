//! # Node Runtime
//!
//! Composition root: opens storage, loads identity and configuration, and
//! wires chain, mempool, mining and p2p together over the shared bus.

pub mod adapters;
pub mod config;
pub mod identity;
pub mod node;
pub mod state_view;

pub use config::NodeConfig;
pub use identity::IdentityService;
pub use node::Node;
