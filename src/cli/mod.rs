pub mod config;
pub mod inbox;
pub mod init;
pub mod listing;
pub mod org;
pub mod thread;

use anyhow::{Context, Result};
use resource_exchange::config::ExchangeConfig;
use resource_exchange::negotiation::NegotiationEngine;
use resource_exchange::notify;
use resource_exchange::organization::Organization;
use resource_exchange::relay::NotificationRelay;
use resource_exchange::storage::database::ConnectionRole;
use resource_exchange::storage::manager::StorageManager;
use resource_exchange::views;
use resource_exchange::ExchangeError;

/// One engine per CLI invocation, wired from config.json.
pub fn open_engine() -> Result<NegotiationEngine> {
    let config = ExchangeConfig::load();
    let conn = StorageManager::new(ConnectionRole::Cli, &config)
        .open()
        .context("Failed to open exchange database")?;
    let relay = NotificationRelay::shared(config.relay.queue_capacity);
    let notifier = notify::sender_from_config(&config.notifier);
    Ok(NegotiationEngine::new(conn, relay, notifier))
}

/// Acting organization for `--user`.
pub fn resolve_org(engine: &NegotiationEngine, user: Option<&str>) -> Result<Organization> {
    let user = user.context("--user is required for this command")?;
    engine
        .resolve_user(user)?
        .with_context(|| format!("User '{}' has no organization. Run 'org register' first.", user))
}

/// Expected outcomes (listing filled, thread void, ...) print as notices;
/// everything else is an error, with a hint when one applies.
pub fn report(err: &anyhow::Error) {
    let exchange_err = err.downcast_ref::<ExchangeError>();
    let notice = exchange_err.and_then(views::notice_for);
    if let (Some(notice), true) = (&notice, exchange_err.is_some_and(ExchangeError::is_informational)) {
        println!("{}", notice);
        return;
    }
    eprintln!("Error: {:#}", err);
    if let Some(hint) = notice {
        eprintln!("{}", hint);
    }
    if exchange_err.is_some_and(ExchangeError::is_transient) {
        eprintln!("The database is busy. Try again.");
    }
}

pub fn short(id: &str) -> &str {
    &id[..id.len().min(8)]
}
