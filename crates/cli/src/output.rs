//! Console output for scenario runs
//!
//! One line per scenario; failures add the first distinguishing error and
//! where the evidence landed. Full detail lives in the JSON reports.

use std::path::Path;

use colored::Colorize;
use webscout_common::report::{RunSummary, SummaryLine};
use webscout_common::Outcome;

pub fn print_scenario_line(line: &SummaryLine, run_dir: &Path) {
    let outcome = match line.outcome {
        Outcome::Pass => "pass".green(),
        Outcome::Fail => "fail".red(),
        Outcome::Error => "error".yellow(),
    };

    println!("{}  {}  ({} ms)", outcome, line.scenario, line.duration_ms);

    if !line.outcome.is_pass() {
        if let Some(error) = &line.error {
            println!("      {}", error.dimmed());
        }
        println!(
            "      evidence: {}",
            run_dir.join(&line.scenario).display()
        );
    }
}

pub fn print_summary(summary: &RunSummary, run_dir: &Path) {
    println!();
    for line in &summary.scenarios {
        print_scenario_line(line, run_dir);
    }
    println!();

    let verdict = if summary.all_passed() {
        format!("{} passed", summary.passed).green()
    } else {
        format!(
            "{} passed, {} failed, {} errored",
            summary.passed, summary.failed, summary.errored
        )
        .red()
    };
    println!(
        "{} of {} scenarios ({} ms) -> {}",
        verdict,
        summary.total,
        summary.duration_ms,
        run_dir.join("summary.json").display()
    );
}
