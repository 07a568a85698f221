//! ## Bridge Configuration Module
//!
//! Defines [`BridgeConfig`], the configuration loaded from the TOML file given on the command
//! line.
//!
//! This module handles:
//! - The listening address and port of the inbound bridge
//! - The websocket URL of the binary dialect host node behind the bridge
//! - The host's real version and whether prerelease suffixes are hidden from peers
//! - Connection paths of both dialects ([`DialectPaths`])
//! - Structural limits applied to legacy requests ([`Limits`])
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Configuration for the bridge.
#[derive(Debug, Deserialize, Clone)]
pub struct BridgeConfig {
    /// The address the bridge listens on.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// The port the bridge listens on.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Websocket URL of the binary dialect host node, e.g. `ws://127.0.0.1:4000`.
    pub host_url: String,
    /// The real semantic version of the host node.
    pub version: String,
    /// Removes `-...` prerelease suffixes from every version shown to peers.
    #[serde(default)]
    pub hide_prerelease: bool,
    #[serde(default)]
    pub paths: DialectPaths,
    #[serde(default)]
    pub limits: Limits,
    /// The path to the log file for the bridge.
    log_file: Option<PathBuf>,
}

impl BridgeConfig {
    pub fn new(host_url: String, version: String) -> Self {
        Self {
            listen_address: default_listen_address(),
            listen_port: default_listen_port(),
            host_url,
            version,
            hide_prerelease: false,
            paths: DialectPaths::default(),
            limits: Limits::default(),
            log_file: None,
        }
    }

    pub fn set_log_dir(&mut self, log_dir: Option<PathBuf>) {
        if let Some(dir) = log_dir {
            self.log_file = Some(dir);
        }
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }
}

/// Websocket paths of both dialects.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct DialectPaths {
    #[serde(default = "default_binary_path")]
    pub binary: String,
    #[serde(default = "default_legacy_path")]
    pub legacy: String,
}

impl Default for DialectPaths {
    fn default() -> Self {
        Self {
            binary: default_binary_path(),
            legacy: default_legacy_path(),
        }
    }
}

/// Structural limits enforced on legacy traffic.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of transactions in one `postTransactions` request.
    #[serde(default = "default_max_transactions_per_request")]
    pub max_transactions_per_request: usize,
    /// Maximum size in bytes of a legacy request.
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
    /// Maximum size in bytes of a legacy response.
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
    /// Applies the lightweight shape check to every posted transaction.
    #[serde(default = "default_true")]
    pub validate_transaction_shape: bool,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_transactions_per_request: default_max_transactions_per_request(),
            max_request_bytes: default_max_request_bytes(),
            max_response_bytes: default_max_response_bytes(),
            validate_transaction_shape: true,
        }
    }
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    4002
}

fn default_binary_path() -> String {
    "/".to_string()
}

fn default_legacy_path() -> String {
    "/socketcluster/".to_string()
}

fn default_max_transactions_per_request() -> usize {
    40
}

fn default_max_request_bytes() -> usize {
    2 * 1024 * 1024
}

fn default_max_response_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_true() -> bool {
    true
}
