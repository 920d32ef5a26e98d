pub mod build;
pub mod config;
pub mod fmt;
pub mod serve;
pub mod test;

use colored::Colorize;
use jac_core::diag::Diagnostic;

/// Render accumulated diagnostics the way users see them: one line each,
/// colorized by severity.
pub fn print_diagnostics<'a>(diags: impl Iterator<Item = &'a Diagnostic>) -> usize {
    let mut errors = 0;
    for diag in diags {
        match diag.severity {
            jac_core::diag::Severity::Error => {
                errors += 1;
                eprintln!("{} {diag}", "error:".red().bold());
            }
            jac_core::diag::Severity::Warning => {
                eprintln!("{} {diag}", "warning:".yellow().bold());
            }
        }
    }
    errors
}

/// Require an existing `.jac` source path.
pub fn require_jac_file(path: &std::path::Path) -> Result<(), String> {
    if path.extension().and_then(|e| e.to_str()) != Some("jac") {
        return Err(format!("'{}' is not a .jac file", path.display()));
    }
    if !path.is_file() {
        return Err(format!("'{}' does not exist", path.display()));
    }
    Ok(())
}
