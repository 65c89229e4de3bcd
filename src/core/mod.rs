//! Core composition logic: types, parsing, resolution, composition, planning, execution.

pub mod composer;
pub mod error;
pub mod executor;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod state;
pub mod types;
