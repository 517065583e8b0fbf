use std::sync::Arc;

use colored::Colorize;

use super::{coordinator, load_page, print_report, read_code, write_output};
use crate::cli::{Cli, RunArgs};
use pagetweak::config::Config;
use pagetweak::error::{PagetweakError, Result};
use pagetweak::executor::InProcessTab;

pub async fn run(cli: &Cli, args: &RunArgs) -> Result<()> {
    let config = Config::load()?;
    let code = read_code(&args.code)?;
    let document = load_page(&args.page)?;
    let tab = Arc::new(InProcessTab::new(1, args.host.as_str(), document));
    let coordinator = coordinator(&config, &args.page);

    let report = coordinator.execute(&code, tab.clone()).await;
    coordinator.settle().await;

    let html = tab
        .html()
        .map_err(|e| PagetweakError::Other(e.to_string()))?;
    write_output(args.page.output.as_deref(), &html)?;

    if cli.json {
        let mut value = serde_json::to_value(&report)?;
        value["html"] = serde_json::Value::String(html);
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        print_report("Snippet", &report);
        if cli.verbose {
            let stages: Vec<String> = report
                .transitions
                .iter()
                .map(|stage| format!("{:?}", stage))
                .collect();
            println!("  {}", stages.join(" → ").dimmed());
        }
        if args.page.output.is_none() {
            println!("{}", html);
        }
    }

    if report.outcome.succeeded {
        Ok(())
    } else {
        Err(PagetweakError::ExecutionFailed(
            report
                .outcome
                .error_message
                .unwrap_or_else(|| "Unknown error".to_string()),
        ))
    }
}
