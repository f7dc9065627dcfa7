//! Core recipe logic: types, parsing, resolution, registry, execution.

pub mod error;
pub mod executor;
pub mod parser;
pub mod recipe;
pub mod registry;
pub mod resolver;
pub mod state;
pub mod step;
pub mod types;
