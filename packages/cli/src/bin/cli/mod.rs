// ABOUTME: Command handlers for the homelab binary
// ABOUTME: deploy lives on its own; the smaller service commands share a module

pub mod deploy;
pub mod services;

use colored::*;
use homelab_deploy::ValidationReport;

pub fn print_validation(report: &ValidationReport) {
    for warning in &report.warnings {
        println!("{} {}", "⚠".yellow(), warning);
    }
    for error in &report.errors {
        println!("{} {}", "✗".red(), error);
    }
}
