// crates/tally-config/src/lib.rs
// ============================================================================
// Module: Tally Config Library
// Description: Plugin runtime configuration model and validation.
// Purpose: Single source of truth for tally-plugin.toml semantics.
// Dependencies: serde, serde_json, toml
// ============================================================================

//! ## Overview
//! `tally-config` defines how a plugin process is configured: which RPC
//! transport it serves, how its heartbeat supervisor is tuned, where its log
//! events go, and the frame/body limits its transports enforce. Configuration
//! comes from a TOML file or from the JSON argument the control process passes
//! at launch, and is validated fail-closed in both cases.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
