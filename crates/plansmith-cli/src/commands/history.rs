use anyhow::Result;
use plansmith_agent::PlanOrchestrator;
use serde_json::json;

use crate::output::print_json;

pub(crate) fn run_accept(agent: &mut PlanOrchestrator, path: &str, json_mode: bool) -> Result<()> {
    let accepted = agent.accept(path)?;
    if json_mode {
        print_json(&json!({"path": path, "accepted": accepted}))?;
    } else if accepted {
        println!("accepted {path}");
    } else {
        println!("no recorded change for {path}");
    }
    Ok(())
}

pub(crate) fn run_reject(agent: &mut PlanOrchestrator, path: &str, json_mode: bool) -> Result<()> {
    let rejected = agent.reject(path)?;
    if json_mode {
        print_json(&json!({"path": path, "rejected": rejected}))?;
    } else if rejected {
        println!("rejected {path}");
    } else {
        println!("no recorded change for {path}");
    }
    Ok(())
}

pub(crate) fn run_revert(agent: &mut PlanOrchestrator, index: i64, json_mode: bool) -> Result<()> {
    let restored = agent.revert(index)?;
    if json_mode {
        print_json(&json!({
            "reverted": restored.is_some(),
            "index": index,
            "restored": restored.clone().unwrap_or_default(),
            "current_checkpoint": agent.current_checkpoint(),
        }))?;
        return Ok(());
    }
    match restored {
        Some(files) => println!(
            "reverted to checkpoint {index} ({} file(s) restored)",
            files.len()
        ),
        None => println!(
            "checkpoint {index} is out of range (0..={})",
            agent.history().len()
        ),
    }
    Ok(())
}

pub(crate) fn run_redo(agent: &mut PlanOrchestrator, index: i64, json_mode: bool) -> Result<()> {
    let replayed = agent.redo(index)?;
    if json_mode {
        print_json(&json!({
            "redone": replayed.is_some(),
            "index": index,
            "replayed": replayed.clone().unwrap_or_default(),
            "current_checkpoint": agent.current_checkpoint(),
        }))?;
        return Ok(());
    }
    match replayed {
        Some(files) => println!("redone to checkpoint {index} ({} file(s) written)", files.len()),
        None => println!(
            "cannot redo to {index}: valid range is {}..={}",
            agent.current_checkpoint(),
            agent.history().len()
        ),
    }
    Ok(())
}

pub(crate) fn run_history(agent: &PlanOrchestrator, json_mode: bool) -> Result<()> {
    let cursor = agent.current_checkpoint();
    let records: Vec<_> = agent
        .history()
        .iter()
        .enumerate()
        .map(|(index, record)| {
            json!({
                "index": index,
                "file_path": record.file_path,
                "created": record.created,
                "before_bytes": record.before.len(),
                "after_bytes": record.after.len(),
                "active": index < cursor,
            })
        })
        .collect();
    if json_mode {
        return print_json(&json!({"current_checkpoint": cursor, "records": records}));
    }
    if records.is_empty() {
        println!("no recorded changes.");
        return Ok(());
    }
    for (index, record) in agent.history().iter().enumerate() {
        let marker = if index < cursor { ' ' } else { '~' };
        let kind = if record.created { "created" } else { "modified" };
        println!("{marker}{index:>4}  {kind:<8}  {}", record.file_path);
    }
    println!("current checkpoint: {cursor}");
    Ok(())
}
