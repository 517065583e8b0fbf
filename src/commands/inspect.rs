use colored::Colorize;

use super::read_code;
use crate::cli::Cli;
use pagetweak::error::Result;
use pagetweak::matcher::{match_intent, Operation};
use pagetweak::snippet::sanitize;

pub async fn run(cli: &Cli, code: &str) -> Result<()> {
    let sanitized = sanitize(&read_code(code)?);
    let intent = match_intent(&sanitized);

    if cli.json {
        let mut value = serde_json::json!({ "sanitized": sanitized.as_str() });
        match &intent {
            Ok(intent) => value["intent"] = serde_json::to_value(intent)?,
            Err(fault) => value["error"] = serde_json::Value::String(fault.to_string()),
        }
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{}", "Sanitized code:".bold());
    println!("{}", sanitized);
    println!();

    match intent {
        Ok(intent) => {
            let operation = match &intent.operation {
                Some(Operation::Remove) => "remove".to_string(),
                Some(Operation::SetDisplay(value)) => format!("style.display = {}", value),
                None => "none (no-op)".dimmed().to_string(),
            };
            println!("{} CSP-safe pattern recognised", "✓".green());
            println!("  {:<10} {}", "selector:", intent.selector_kind);
            println!("  {:<10} {}", "value:", intent.selector_value.cyan());
            println!("  {:<10} {}", "operation:", operation);
        }
        Err(fault) => {
            println!("{} {}", "!".yellow(), fault);
            println!("  {}", "Execution will fall back to script injection".dimmed());
        }
    }

    Ok(())
}
