use anyhow::{Context, Result};
use plansmith_agent::{PlanOrchestrator, PlanOutcome};
use std::fs;
use std::io::Read;
use std::path::Path;

use crate::output::print_json;

fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read response file {}", path.display())),
        None => {
            let mut input = String::new();
            std::io::stdin().read_to_string(&mut input)?;
            Ok(input)
        }
    }
}

pub(crate) fn run_apply(
    agent: &mut PlanOrchestrator,
    file: Option<&Path>,
    json_mode: bool,
) -> Result<()> {
    let response = read_input(file)?;
    let outcome = agent.execute_plan(response)?;
    if json_mode {
        print_json(&outcome)?;
    } else {
        print_outcome(&outcome);
    }
    Ok(())
}

pub(crate) fn run_extract(
    agent: &PlanOrchestrator,
    file: Option<&Path>,
    json_mode: bool,
) -> Result<()> {
    let response = read_input(file)?;
    let extraction = agent.extract(&response);
    if json_mode {
        return print_json(&extraction);
    }
    if extraction.files.is_empty() {
        println!("no files found.");
    }
    for file in &extraction.files {
        println!(
            "{} ({:?}, {} bytes)",
            file.path,
            file.source_hint,
            file.content.len()
        );
    }
    for block in &extraction.skipped {
        println!("skipped block at line {}: {}", block.line, block.reason);
    }
    Ok(())
}

pub(crate) fn run_ask(agent: &mut PlanOrchestrator, prompt: &str, json_mode: bool) -> Result<()> {
    let answer = agent.ask(prompt)?;
    if json_mode {
        print_json(&answer)?;
    } else {
        print_outcome(&answer.outcome);
    }
    Ok(())
}

fn print_outcome(outcome: &PlanOutcome) {
    if outcome.reports.is_empty() {
        println!("nothing to do: the response contained no file blocks or steps.");
    }
    for path in &outcome.written {
        println!("wrote {path}");
    }
    for (idx, report) in outcome.reports.iter().enumerate() {
        if report.result.is_ok() {
            continue;
        }
        println!(
            "step {} ({}.{} {}) {:?}: {}",
            idx + 1,
            report.step.tool,
            report.step.action,
            report.step.target,
            report.result.status,
            report.result.error_message().unwrap_or("failed")
        );
        if let Some(fix) = report
            .result
            .error_info
            .as_ref()
            .and_then(|info| info.suggested_fix.as_deref())
        {
            println!("  hint: {fix}");
        }
    }
    for block in &outcome.skipped {
        println!("skipped block at line {}: {}", block.line, block.reason);
    }
}
