//! Tripwire: BLAKE3 template hashing and provenance event logging.

pub mod eventlog;
pub mod hasher;
