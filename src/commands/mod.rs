pub mod autorun;
pub mod config;
pub mod host;
pub mod inspect;
pub mod run;
pub mod snippet;

use std::io::Read;
use std::path::Path;

use colored::Colorize;

use crate::cli::{Cli, PageArgs};
use pagetweak::config::Config;
use pagetweak::coordinator::{Coordinator, ExecutionReport};
use pagetweak::error::{PagetweakError, Result};
use pagetweak::page::{ContentSecurityPolicy, Document};
use pagetweak::storage::SnippetStore;

const BLANK_PAGE: &str = "<html><head></head><body></body></html>";

/// Code argument, or stdin when it is "-".
pub(crate) fn read_code(arg: &str) -> Result<String> {
    if arg != "-" {
        return Ok(arg.to_string());
    }
    let mut code = String::new();
    std::io::stdin().read_to_string(&mut code)?;
    Ok(code)
}

pub(crate) fn open_store(cli: &Cli, config: &Config) -> Result<SnippetStore> {
    let path = cli
        .storage
        .clone()
        .unwrap_or_else(|| config.storage_path());
    SnippetStore::load(path)
}

pub(crate) fn load_page(args: &PageArgs) -> Result<Document> {
    let html = match &args.page {
        Some(path) => std::fs::read_to_string(path)?,
        None => BLANK_PAGE.to_string(),
    };
    let document =
        Document::parse(&html).map_err(|e| PagetweakError::HtmlParse(e.to_string()))?;
    Ok(match &args.csp {
        Some(header) => document.with_csp(ContentSecurityPolicy::parse(header)),
        None => document,
    })
}

pub(crate) fn coordinator(config: &Config, args: &PageArgs) -> Coordinator {
    let mut execution = config.execution.clone();
    execution.allow_eval |= args.allow_eval;
    Coordinator::from_config(&execution)
}

pub(crate) fn write_output(path: Option<&Path>, html: &str) -> Result<()> {
    if let Some(path) = path {
        std::fs::write(path, html)?;
        tracing::info!("Wrote resulting page to {}", path.display());
    }
    Ok(())
}

/// One human-readable line per report.
pub(crate) fn print_report(label: &str, report: &ExecutionReport) {
    if report.outcome.succeeded {
        let via = report
            .executed_by
            .map(|kind| kind.to_string())
            .unwrap_or_default();
        println!("{} {} {}", "✓".green(), label, format!("({})", via).dimmed());
    } else {
        println!(
            "{} {}: {}",
            "✗".red(),
            label,
            report.outcome.error_message.as_deref().unwrap_or("Unknown error")
        );
    }
}
