//! Turns a server specification into a list of addresses
//!
//! Accepted forms:
//!
//! - `ip:port`, `[v6]:port`, `unix:/path` or `host:port`
//! - `list://addr1,addr2,...`
//! - `file:///path/to/servers` with one address per line; blank lines and
//!   lines starting with `#` are skipped

use crate::network::Address;
use crate::{Result, RpcError};
use std::path::Path;
use tracing::debug;

const LIST_PREFIX: &str = "list://";
const FILE_PREFIX: &str = "file://";

/// Whether the specification names more than a single server
pub fn is_naming_url(spec: &str) -> bool {
    let spec = spec.trim();
    spec.starts_with(LIST_PREFIX) || spec.starts_with(FILE_PREFIX)
}

pub async fn resolve(spec: &str) -> Result<Vec<Address>> {
    let spec = spec.trim();
    let servers = if let Some(list) = spec.strip_prefix(LIST_PREFIX) {
        resolve_entries(list.split(',')).await?
    } else if let Some(path) = spec.strip_prefix(FILE_PREFIX) {
        let content = tokio::fs::read_to_string(Path::new(path)).await.map_err(|e| {
            RpcError::Config(format!("Failed to read server list '{path}': {e}"))
        })?;
        resolve_entries(
            content
                .lines()
                .filter(|line| !line.trim_start().starts_with('#')),
        )
        .await?
    } else {
        vec![resolve_one(spec).await?]
    };

    if servers.is_empty() {
        return Err(RpcError::Config(format!("No servers found in '{spec}'")));
    }
    debug!(spec, servers = servers.len(), "Resolved servers");
    Ok(servers)
}

async fn resolve_entries<'a, I>(entries: I) -> Result<Vec<Address>>
where
    I: Iterator<Item = &'a str>,
{
    let mut servers = Vec::new();
    for entry in entries.map(str::trim).filter(|e| !e.is_empty()) {
        let address = resolve_one(entry).await?;
        if !servers.contains(&address) {
            servers.push(address);
        }
    }
    Ok(servers)
}

async fn resolve_one(entry: &str) -> Result<Address> {
    if let Ok(address) = entry.parse::<Address>() {
        return Ok(address);
    }
    if entry.is_empty() || entry.starts_with("unix:") {
        return Err(RpcError::Config(format!("Invalid server address '{entry}'")));
    }

    let mut resolved = tokio::net::lookup_host(entry)
        .await
        .map_err(|e| RpcError::Config(format!("Failed to resolve '{entry}': {e}")))?;
    resolved
        .next()
        .map(Address::Network)
        .ok_or_else(|| RpcError::Config(format!("'{entry}' resolved to no addresses")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_single_address() {
        let servers = resolve("0.0.0.0:8000").await.unwrap();
        assert_eq!(servers, vec!["0.0.0.0:8000".parse::<Address>().unwrap()]);
        assert!(!is_naming_url("0.0.0.0:8000"));
    }

    #[tokio::test]
    async fn test_list_dedups_and_trims() {
        let servers = resolve("list://127.0.0.1:1, 127.0.0.1:2,,127.0.0.1:1")
            .await
            .unwrap();
        assert_eq!(servers.len(), 2);
        assert!(is_naming_url("list://127.0.0.1:1"));
    }

    #[tokio::test]
    async fn test_file_skips_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# echo servers").unwrap();
        writeln!(file, "127.0.0.1:8001").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "unix:/tmp/echo.sock").unwrap();

        let spec = format!("file://{}", file.path().display());
        let servers = resolve(&spec).await.unwrap();
        assert_eq!(servers.len(), 2);
        assert!(servers[1].is_unix());
    }

    #[tokio::test]
    async fn test_hostname_resolution() {
        let servers = resolve("localhost:8000").await.unwrap();
        assert_eq!(servers[0].as_network().unwrap().port(), 8000);
    }

    #[tokio::test]
    async fn test_errors() {
        assert!(matches!(resolve("list://").await, Err(RpcError::Config(_))));
        assert!(matches!(resolve("file:///does/not/exist").await, Err(RpcError::Config(_))));
        assert!(matches!(resolve("no port here").await, Err(RpcError::Config(_))));
    }
}
