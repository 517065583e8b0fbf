use std::sync::Arc;

use super::open_store;
use crate::cli::Cli;
use pagetweak::config::Config;
use pagetweak::coordinator::Coordinator;
use pagetweak::error::Result;
use pagetweak::protocol::{self, HostContext};

pub async fn run(cli: &Cli) -> Result<()> {
    let config = Config::load()?;
    let store = open_store(cli, &config)?;
    let ctx = HostContext {
        coordinator: Arc::new(Coordinator::from_config(&config.execution)),
        storage_path: store.path().to_path_buf(),
    };
    protocol::run(&ctx).await
}
