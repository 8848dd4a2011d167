use anyhow::Result;
use plansmith_agent::PlanOrchestrator;
use plansmith_core::AppConfig;
use std::path::Path;

use crate::output::{print_json, redact_config_for_display};

pub(crate) fn run_config(workspace: &Path, json_mode: bool) -> Result<()> {
    let cfg = AppConfig::load(workspace)?;
    let display_cfg = redact_config_for_display(&cfg)?;
    if json_mode {
        print_json(&display_cfg)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&display_cfg)?);
    }
    Ok(())
}

pub(crate) fn run_analyze(agent: &PlanOrchestrator, json_mode: bool) -> Result<()> {
    let summary = agent.analyze_repository()?;
    if json_mode {
        return print_json(&summary);
    }
    println!(
        "{} file(s), {} ignored",
        summary.files, summary.ignored
    );
    for (ext, count) in &summary.by_extension {
        println!("  {ext:<10} {count}");
    }
    Ok(())
}
