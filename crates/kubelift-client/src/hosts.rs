//! Loopback alias lookup in the static host-alias table.
//!
//! Go's net/http ignores `HTTPS_PROXY` when the target host is `localhost`
//! or a loopback literal, so a kubeconfig pointing kubectl (or any other
//! client-go tool) at `https://127.0.0.1:6443` silently bypasses the proxy.
//! The workaround is to address the API server through an alternate
//! `/etc/hosts` alias for 127.0.0.1, which the proxy exemption does not
//! cover.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{ClientError, Result};

/// The conventional host-alias table location.
pub const DEFAULT_HOSTS_PATH: &str = "/etc/hosts";

/// The loopback literal the alias must replace.
pub const LOOPBACK_ADDRESS: &str = "127.0.0.1";

/// Returns every alias mapped to `address` in the given hosts table.
///
/// # Errors
///
/// Returns a read error with the path attached when the table cannot be
/// read; an unreadable table is fatal to the invocation.
pub fn reverse_lookup(path: &Path, address: &str) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path).map_err(|err| ClientError::read(path, err))?;
    Ok(aliases_for(&contents, address))
}

/// Parses hosts-table contents and collects the aliases for `address`.
#[must_use]
pub fn aliases_for(contents: &str, address: &str) -> Vec<String> {
    let mut aliases = Vec::new();
    for line in contents.lines() {
        // Everything after '#' is a comment.
        let line = line.split('#').next().unwrap_or_default();
        let mut fields = line.split_whitespace();
        if fields.next() == Some(address) {
            aliases.extend(fields.map(ToString::to_string));
        }
    }
    aliases
}

/// Finds the first 127.0.0.1 alias that is not the literal `localhost`.
///
/// # Errors
///
/// Propagates the table read error.
pub fn loopback_alias(path: &Path) -> Result<Option<String>> {
    let aliases = reverse_lookup(path, LOOPBACK_ADDRESS)?;
    debug!("aliases found for {LOOPBACK_ADDRESS}: {aliases:?}");
    Ok(aliases.into_iter().find(|alias| alias != "localhost"))
}

/// Rewrites `localhost` and the loopback literal in a server URL to the
/// given alias.
#[must_use]
pub fn rewrite_loopback(server: &str, alias: &str) -> String {
    server
        .replace("localhost", alias)
        .replace(LOOPBACK_ADDRESS, alias)
}
