//! secure-dev-manager v0.1 — core library
//!
//! A safety-aware process-management core for Windows developer tool
//! channels: tiered process discovery, a three-tier protection classifier,
//! parallel port inspection, and process-tree termination with
//! orphan-avoidance guarantees. See each module's docs for its piece of
//! the design.

pub mod auditlog;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod inspector;
pub mod platform;
pub mod port_scanner;
pub mod protection;
pub mod schema;
pub mod server;
pub mod spawn;
pub mod termination;
