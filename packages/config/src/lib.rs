// ABOUTME: Configuration constants and environment helpers for the homelab deployer
// ABOUTME: Shared by the deployment core and the CLI so variable names live in one place

pub mod constants;
pub mod env;

pub use env::{env_or_default, optional_env, parse_bool_env, parse_env_or_default};
