pub mod config;
pub mod evaluate;
pub mod records;
pub mod run;

use anyhow::Context;
use bridge_core::config::BridgeConfig;
use std::path::Path;

/// Load the config named by `--config` / `AUCTION_BRIDGE_CONFIG`.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<BridgeConfig> {
    let path = path.context("no config file: pass --config or set AUCTION_BRIDGE_CONFIG")?;
    BridgeConfig::load(path).with_context(|| format!("failed to load config {}", path.display()))
}
