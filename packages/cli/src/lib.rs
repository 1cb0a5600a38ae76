// ABOUTME: Presentation layer for the homelab CLI
// ABOUTME: Console progress rendering, tables and wiring of the deployment core from configuration

pub mod console;
pub mod context;
pub mod tables;

pub use console::ConsoleObserver;
pub use context::{init_tracing, load_env, DeployContext};
