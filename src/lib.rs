//! recipectl: plugin recipes as ordered, reversible steps.
//!
//! A recipe is an ordered list of steps (install a plugin, write a config
//! file, toggle a feature flag, run a shell action). Install applies them
//! head-to-tail, uninstall reverts them tail-to-head. Recipes are served over
//! HTTP and driven from the CLI, with step status persisted per recipe.

pub mod api;
pub mod cli;
pub mod config;
pub mod core;
pub mod provenance;
pub mod steps;
pub mod telemetry;
pub mod transport;
