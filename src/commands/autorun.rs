use std::sync::Arc;

use colored::Colorize;

use super::{coordinator, load_page, open_store, print_report, write_output};
use crate::cli::{Cli, PageArgs};
use pagetweak::config::Config;
use pagetweak::error::{PagetweakError, Result};
use pagetweak::executor::InProcessTab;
use pagetweak::session::PageSession;

pub async fn run(cli: &Cli, host: &str, page: &PageArgs) -> Result<()> {
    let config = Config::load()?;
    let store = open_store(cli, &config)?;
    let tab = Arc::new(InProcessTab::new(1, host, load_page(page)?));
    let session = PageSession::open(store, tab.clone(), Arc::new(coordinator(&config, page)));

    let reports = session.run_enabled().await;
    session.close().await;

    let html = tab
        .html()
        .map_err(|e| PagetweakError::Other(e.to_string()))?;
    write_output(page.output.as_deref(), &html)?;

    if cli.json {
        let runs: Vec<_> = reports
            .iter()
            .map(|(id, report)| {
                serde_json::json!({
                    "id": id,
                    "success": report.outcome.succeeded,
                    "error": report.outcome.error_message,
                    "executedBy": report.executed_by,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "website": host,
                "runs": runs,
                "html": html,
            }))?
        );
        return Ok(());
    }

    if reports.is_empty() {
        println!("{}", format!("No enabled snippets for {}", host).dimmed());
    }
    for (id, report) in &reports {
        print_report(id, report);
    }
    if page.output.is_none() {
        println!("{}", html);
    }

    Ok(())
}
