//! ccm-infra: typed stack composition for the Cricket Club Manager cloud footprint.
//!
//! Stacks declare their inputs and outputs; the composer orders them,
//! wires outputs into inputs and delegates resource creation to a
//! provisioning engine. Synthesized templates are hashed with BLAKE3 and
//! recorded in a per-environment lock with a provenance event log.

pub mod cli;
pub mod core;
pub mod infra;
pub mod provision;
pub mod tripwire;
pub mod util;
