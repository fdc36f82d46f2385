//! Core library for the `ironswarm` node.
//!
//! This crate provides the building blocks used by the binary: the peer
//! registry and gossip membership layer, the framed TCP transport, the
//! per-journey volume pacers, datapools, and the mergeable metrics core with
//! cluster-wide aggregation. The primary user-facing interface is the
//! `ironswarm` command-line node; library APIs may evolve as the node grows.
pub mod args;
pub mod cluster;
pub mod config;
pub mod datapool;
pub mod error;
pub mod gossip;
pub mod journey;
pub mod logger;
pub mod metrics;
pub mod node;
pub mod scenario;
pub mod shutdown;
pub mod transport;
