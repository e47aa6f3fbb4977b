//! Human and JSON rendering of a deployment report

use std::io::Write;

use colored::Colorize;

use crate::deploy::DeploymentReport;
use crate::errors::DeployError;

/// Print the report to stdout
pub fn print_report(report: &DeploymentReport, json: bool) -> Result<(), DeployError> {
    let mut stdout = std::io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut stdout, report)?;
        writeln!(stdout)?;
    } else {
        write!(stdout, "{}", format_report(report))?;
    }
    Ok(())
}

/// One line per device plus a totals line
pub fn format_report(report: &DeploymentReport) -> String {
    let mut out = String::new();
    for outcome in &report.outcomes {
        let target = format!("#{} {}:{}", outcome.index, outcome.host, outcome.port);
        let line = match (&outcome.error, outcome.success) {
            (None, true) => format!(
                "{} {} {} ({} ms)",
                "ok".green().bold(),
                target,
                outcome.phase,
                outcome.duration_ms
            ),
            (error, _) => format!(
                "{} {} failed at {}: {}",
                "FAILED".red().bold(),
                target,
                outcome.phase,
                error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "unknown failure".to_string())
            ),
        };
        out.push_str(&line);
        out.push('\n');
    }

    let failed = report.failed_count();
    let totals = format!(
        "{} devices: {} succeeded, {} failed",
        report.outcomes.len(),
        report.outcomes.len() - failed,
        failed
    );
    if failed == 0 {
        out.push_str(&totals.green().to_string());
    } else {
        out.push_str(&totals.red().to_string());
    }
    out.push('\n');
    out
}
