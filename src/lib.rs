//! Bidirectional liked-track sync daemon between two music streaming
//! services. See each module for the part of the design it covers; the
//! top-level pieces are wired together in `main.rs`.

pub mod clients;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod logging;
pub mod matcher;
pub mod rpc;
pub mod rpc_client;
pub mod scheduler;
pub mod store;
