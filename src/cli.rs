use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::commands;
use pagetweak::error::Result;

/// pagetweak - Run generated page tweaks past Content-Security-Policy
#[derive(Parser)]
#[command(name = "pagetweak")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Snippet storage file (overrides storage.path)
    #[arg(long, global = true)]
    pub storage: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute code against an HTML page through the escalation chain
    Run(RunArgs),

    /// Show the sanitized code and the operation it is recognised as
    Inspect {
        /// Generated code ("-" reads stdin)
        code: String,
    },

    /// Manage stored snippets
    Snippet {
        #[command(subcommand)]
        command: SnippetCommands,
    },

    /// Load a page for a website and run its enabled snippets
    Autorun {
        /// Website hostname (e.g., "news.example.com")
        host: String,

        #[command(flatten)]
        page: PageArgs,
    },

    /// Serve one length-prefixed request on stdin/stdout
    Host,

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Args)]
pub struct RunArgs {
    /// Generated code ("-" reads stdin)
    pub code: String,

    /// Hostname of the page
    #[arg(long, default_value = "localhost")]
    pub host: String,

    #[command(flatten)]
    pub page: PageArgs,
}

#[derive(Args)]
pub struct PageArgs {
    /// HTML file to load (blank page when omitted)
    #[arg(long)]
    pub page: Option<PathBuf>,

    /// Content-Security-Policy header of the page
    #[arg(long)]
    pub csp: Option<String>,

    /// Write the resulting HTML to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Allow dynamic evaluation as a last resort (overrides execution.allow_eval)
    #[arg(long)]
    pub allow_eval: bool,
}

#[derive(Subcommand)]
pub enum SnippetCommands {
    /// List stored snippets
    List {
        /// Only this website
        host: Option<String>,
    },

    /// Store a snippet for a website
    Add {
        /// Website hostname
        host: String,

        /// Generated code ("-" reads stdin)
        code: String,

        /// Request the code was generated for; the id is derived from it
        #[arg(short, long)]
        query: Option<String>,

        /// Explicit id (overrides --query)
        #[arg(long)]
        id: Option<String>,

        /// Enable right away
        #[arg(long)]
        enable: bool,
    },

    /// Print a snippet's code
    Show {
        host: String,
        id: String,
    },

    /// Delete a snippet and its enabled flag
    Remove {
        host: String,
        id: String,

        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Run a snippet automatically on every page load
    Enable {
        host: String,
        id: String,
    },

    /// Stop running a snippet on page load
    Disable {
        host: String,
        id: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,
        /// Configuration value
        value: String,
    },

    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// Show configuration file path
    Path,

    /// Remove the configuration file
    Reset {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

impl Cli {
    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Commands::Run(args) => commands::run::run(self, args).await,
            Commands::Inspect { code } => commands::inspect::run(self, code).await,
            Commands::Snippet { command } => commands::snippet::run(self, command).await,
            Commands::Autorun { host, page } => commands::autorun::run(self, host, page).await,
            Commands::Host => commands::host::run(self).await,
            Commands::Config { command } => commands::config::run(self, command).await,
        }
    }
}
