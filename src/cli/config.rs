use anyhow::{Context, Result};
use resource_exchange::config::ExchangeConfig;

/// `config show`: display the effective config.
pub fn run_show() -> Result<()> {
    let config = ExchangeConfig::load();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// `config get <key>`: key uses dot notation: `notifier.endpoint`
pub fn run_get(key: &str) -> Result<()> {
    let value = ExchangeConfig::load().get_key(key)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// `config set <key> <value>`: value is parsed as JSON (bool, number,
/// null), falling back to a string.
pub fn run_set(key: &str, value: &str) -> Result<()> {
    let mut config = ExchangeConfig::load();
    config.set_key(key, value)?;
    config.save().context("Failed to write config.json")?;
    println!("{} = {}", key, serde_json::to_string(&config.get_key(key)?)?);
    Ok(())
}
