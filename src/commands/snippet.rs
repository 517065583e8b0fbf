use colored::Colorize;
use dialoguer::Confirm;

use super::{open_store, read_code};
use crate::cli::{Cli, SnippetCommands};
use pagetweak::config::Config;
use pagetweak::error::{PagetweakError, Result};
use pagetweak::snippet::{derive_short_name, sanitize};
use pagetweak::storage::SnippetStore;

pub async fn run(cli: &Cli, command: &SnippetCommands) -> Result<()> {
    let config = Config::load()?;
    let mut store = open_store(cli, &config)?;

    match command {
        SnippetCommands::List { host } => list(cli, &store, host.as_deref()),
        SnippetCommands::Add {
            host,
            code,
            query,
            id,
            enable,
        } => add(
            cli,
            &mut store,
            host,
            code,
            query.as_deref(),
            id.as_deref(),
            *enable,
        ),
        SnippetCommands::Show { host, id } => show(cli, &store, host, id),
        SnippetCommands::Remove { host, id, yes } => remove(cli, &mut store, host, id, *yes),
        SnippetCommands::Enable { host, id } => set_enabled(cli, &mut store, host, id, true),
        SnippetCommands::Disable { host, id } => set_enabled(cli, &mut store, host, id, false),
    }
}

fn list(cli: &Cli, store: &SnippetStore, host: Option<&str>) -> Result<()> {
    let hosts = match host {
        Some(host) => vec![host.to_string()],
        None => store.hosts(),
    };

    if cli.json {
        let listing: Vec<_> = hosts
            .iter()
            .flat_map(|host| {
                store.snippets(host).into_iter().map(move |snippet| {
                    let enabled = store.is_enabled(host, &snippet.id);
                    serde_json::json!({
                        "website": snippet.website,
                        "id": snippet.id,
                        "enabled": enabled,
                        "sourceText": snippet.source_text,
                    })
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    let mut total = 0;
    for host in &hosts {
        let snippets = store.snippets(host);
        if snippets.is_empty() {
            continue;
        }
        println!("{}", host.bold());
        for snippet in snippets {
            let state = if store.is_enabled(host, &snippet.id) {
                "on ".green()
            } else {
                "off".dimmed()
            };
            let preview = sanitize(&snippet.source_text).preview().replace('\n', " ");
            println!("  {} {}  {}", state, snippet.id.cyan(), preview.dimmed());
            total += 1;
        }
    }

    if total == 0 {
        println!("{}", "No snippets stored".dimmed());
    }
    Ok(())
}

fn add(
    cli: &Cli,
    store: &mut SnippetStore,
    host: &str,
    code: &str,
    query: Option<&str>,
    id: Option<&str>,
    enable: bool,
) -> Result<()> {
    let source = read_code(code)?;
    if sanitize(&source).is_empty() {
        return Err(PagetweakError::InvalidSnippet("code is empty".to_string()));
    }

    let requested = match (id, query) {
        (Some(id), _) => id.to_string(),
        (None, Some(query)) => derive_short_name(query),
        (None, None) => derive_short_name(""),
    };
    let id = store.insert_snippet(host, &requested, &source);
    if enable {
        store.set_enabled(host, &id, true)?;
    }
    store.save()?;

    if cli.json {
        println!(
            "{}",
            serde_json::json!({ "website": host, "id": id, "enabled": enable })
        );
    } else {
        println!("{} Saved {} for {}", "✓".green(), id.cyan(), host);
    }
    Ok(())
}

fn show(cli: &Cli, store: &SnippetStore, host: &str, id: &str) -> Result<()> {
    let snippet = store
        .snippet(host, id)
        .ok_or_else(|| PagetweakError::SnippetNotFound(format!("{} on {}", id, host)))?;

    if cli.json {
        let mut value = serde_json::to_value(&snippet)?;
        value["enabled"] = serde_json::Value::Bool(store.is_enabled(host, id));
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", snippet.source_text);
    }
    Ok(())
}

fn remove(cli: &Cli, store: &mut SnippetStore, host: &str, id: &str, yes: bool) -> Result<()> {
    if store.snippet(host, id).is_none() {
        return Err(PagetweakError::SnippetNotFound(format!("{} on {}", id, host)));
    }

    if !yes && !cli.json {
        let confirm = Confirm::new()
            .with_prompt(format!("Delete snippet \"{}\"?", id))
            .default(false)
            .interact()
            .map_err(|e| PagetweakError::Other(format!("Prompt failed: {}", e)))?;

        if !confirm {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    store.remove_snippet(host, id)?;
    store.save()?;

    if cli.json {
        println!(
            "{}",
            serde_json::json!({ "status": "removed", "website": host, "id": id })
        );
    } else {
        println!("{} Removed {}", "✓".green(), id.cyan());
    }
    Ok(())
}

fn set_enabled(cli: &Cli, store: &mut SnippetStore, host: &str, id: &str, enabled: bool) -> Result<()> {
    store.set_enabled(host, id, enabled)?;
    store.save()?;

    if cli.json {
        println!(
            "{}",
            serde_json::json!({ "website": host, "id": id, "enabled": enabled })
        );
    } else if enabled {
        println!("{} {} runs on every {} page load", "✓".green(), id.cyan(), host);
    } else {
        println!("{} {} disabled", "✓".green(), id.cyan());
    }
    Ok(())
}
