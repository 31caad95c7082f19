//! hive-server - HTTP and JSON-RPC gateway for the hive indexer
//!
//! # Architecture
//!
//! ## HTTP Surface
//! - [`api`] - Application state, middleware stack and server loop
//! - [`health`] - `GET /health` indexer lag check
//! - [`rpc`] - JSON-RPC 2.0 endpoint and method registry
//!
//! ## Backends
//! - [`persistence`] - Pooled, request-scoped database sessions
//! - [`steemd`] - Upstream node client
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types
//! - [`json`] - JSON encoding policy

#![forbid(unsafe_code)]

// ============================================================================
// HTTP Surface
// ============================================================================
pub mod api;
pub mod health;
pub mod rpc;

// ============================================================================
// Backends
// ============================================================================
pub mod persistence;
pub mod steemd;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
pub mod json;
