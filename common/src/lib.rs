//! Shared primitives for the engine conformance simulator.
//!
//! Everything in this crate is pure data plus one transport: the fork and
//! blob-gas configuration, the EIP-4844 fee math, the synthetic blob model,
//! the Engine API payload types (with block-hash recomputation for
//! hand-crafted payloads), blob transaction encoding, and the JSON-RPC client
//! used to talk to an execution client.

#![allow(clippy::too_many_arguments)]

pub mod blob;
pub mod config;
pub mod fee;
pub mod payload;
pub mod quantity;
pub mod rpc;
pub mod transaction;

/// Harness build identifier (`<crate version>-<short commit>`)
pub const VERSION: &str = env!("BUILD_VERSION");
