//! Configuration and bootstrap (spec `§4.10`, `§6.5`, `§6.6`).
//!
//! Environment-driven via `clap::Parser` with `env = "..."` attributes, the same pattern
//! as the teacher's `facilitator::config::CliArgs`. `PAY_TO_ADDRESS` missing is a fatal
//! `ConfigError` (spec `§6.6`); routes and the admin `ConfigDoc` are each their own
//! JSON document, written atomically via write-temp-then-rename.

use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::types::{ConfigDoc, RouteRule, RoutesDoc};

fn default_replay_ttl_ms() -> u64 {
    300_000
}

#[derive(Parser, Debug, Clone)]
#[command(name = "x402-gateway")]
#[command(about = "Pay-per-request HTTP API gateway for x402 + AP2")]
pub struct CliArgs {
    /// EVM address payments are made out to. Fatal if unset.
    #[arg(long, env = "PAY_TO_ADDRESS")]
    pub pay_to_address: String,

    #[arg(long, env = "PORT", default_value_t = 4402)]
    pub port: u16,

    #[arg(long, env = "FACILITATOR_URL")]
    pub facilitator_url: String,

    /// Human network name (e.g. `base-sepolia`); resolved to CAIP-2 at startup.
    #[arg(long, env = "BASE_NETWORK", default_value = "base-sepolia")]
    pub base_network: String,

    /// Bearer token required on `/admin/*`. No admin auth if unset (not recommended).
    #[arg(long, env = "ADMIN_KEY")]
    pub admin_key: Option<String>,

    /// Gateway-level API key required on `/api/*`. Unauthenticated if unset.
    #[arg(long, env = "API_KEY")]
    pub api_key: Option<String>,

    #[arg(long, env = "ROUTES_FILE", default_value = "routes.json")]
    pub routes_file: PathBuf,

    #[arg(long, env = "CONFIG_DOC_FILE", default_value = "config-doc.json")]
    pub config_doc_file: PathBuf,

    #[arg(long, env = "REPLAY_TTL_MS", default_value_t = default_replay_ttl_ms())]
    pub replay_ttl_ms: u64,
}

impl CliArgs {
    pub fn load() -> Result<Self, ConfigError> {
        let args = CliArgs::parse();
        if args.pay_to_address.trim().is_empty() {
            return Err(ConfigError::MissingPayToAddress);
        }
        Ok(args)
    }
}

/// Writes `contents` to `path` atomically: write to a sibling temp file, then rename
/// (spec `§4.10`, `§3` `ConfigDoc`).
fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Loads the routes file. A missing file yields an empty table (spec `§4.10`); an
/// unreadable-but-present file is fatal.
pub fn load_routes(path: &Path) -> Result<Vec<RouteRule>, ConfigError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::RoutesFileRead {
        path: path.display().to_string(),
        source: e,
    })?;
    let doc: RoutesDoc = serde_json::from_str(&content)?;
    Ok(doc.routes)
}

pub fn save_routes(path: &Path, routes: &[RouteRule]) -> Result<(), ConfigError> {
    let doc = RoutesDoc { routes: routes.to_vec() };
    let contents = serde_json::to_vec_pretty(&doc)?;
    write_atomic(path, &contents).map_err(ConfigError::RoutesFileWrite)
}

/// Loads the admin `ConfigDoc`, merged over CLI/env defaults. A missing file yields
/// `ConfigDoc::default()`.
pub fn load_config_doc(path: &Path) -> Result<ConfigDoc, ConfigError> {
    if !path.exists() {
        return Ok(ConfigDoc::default());
    }
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::RoutesFileRead {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(serde_json::from_str(&content)?)
}

pub fn save_config_doc(path: &Path, doc: &ConfigDoc) -> Result<(), ConfigError> {
    let contents = serde_json::to_vec_pretty(doc)?;
    write_atomic(path, &contents).map_err(ConfigError::RoutesFileWrite)
}
