// src/queue/discovery.rs

use crate::errors::BridgeError;
use get_if_addrs::{get_if_addrs, IfAddr};
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Channel names that honor an `RP_BRIDGE` override for their address
/// file location; every other channel resolves its address file from
/// the current directory regardless of the environment.
const ENV_OVERRIDE_CHANNELS: &[&str] = &["client_queue", "agent_queue"];

/// First non-loopback IPv4 address on the host, falling back to
/// loopback if none is found. The bridge needs this to rewrite its
/// bound wildcard address (`tcp://*:*`) into something a remote
/// `Putter` or `Getter` can actually connect to.
pub fn local_ip() -> Ipv4Addr {
    let if_addrs = match get_if_addrs() {
        Ok(addrs) => addrs,
        Err(_) => return Ipv4Addr::LOCALHOST,
    };
    for iface in if_addrs {
        if let IfAddr::V4(v4) = iface.addr {
            if !v4.ip.is_loopback() {
                return v4.ip;
            }
        }
    }
    Ipv4Addr::LOCALHOST
}

/// Directory a channel's `<channel>.url` file is read from / written
/// to. `RP_BRIDGE`, when set, overrides this only for the two reserved
/// channel names; everything else always uses the current working
/// directory.
fn discovery_dir(channel_name: &str) -> Result<PathBuf, BridgeError> {
    if ENV_OVERRIDE_CHANNELS.contains(&channel_name) {
        if let Ok(dir) = std::env::var("RP_BRIDGE") {
            return Ok(PathBuf::from(dir));
        }
    }
    std::env::current_dir()
        .map_err(|e| BridgeError::Discovery(format!("cannot resolve cwd: {}", e)))
}

fn address_file_path(channel_name: &str) -> Result<PathBuf, BridgeError> {
    Ok(discovery_dir(channel_name)?.join(format!("{}.url", channel_name)))
}

/// Publishes the bridge's bound addresses for discovery:
///
/// ```text
/// PUT tcp://<host>:<port_in>
/// GET tcp://<host>:<port_out>
/// ```
pub fn publish(
    channel_name: &str,
    input_address: &str,
    output_address: &str,
) -> Result<(), BridgeError> {
    let path = address_file_path(channel_name)?;
    let contents = format!("PUT {}\nGET {}\n", input_address, output_address);
    std::fs::write(&path, contents)
        .map_err(|e| BridgeError::Discovery(format!("cannot write {}: {}", path.display(), e)))
}

/// Reads the address published under `keyword` (`PUT` or `GET`) for
/// `channel_name`. Lines are `KEYWORD URL` separated by whitespace;
/// the first matching keyword wins on duplicates.
pub fn resolve(channel_name: &str, keyword: &str) -> Result<String, BridgeError> {
    let path = address_file_path(channel_name)?;
    let contents = std::fs::read_to_string(&path)
        .map_err(|e| BridgeError::Discovery(format!("cannot read {}: {}", path.display(), e)))?;

    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        if fields.next() == Some(keyword) {
            if let Some(addr) = fields.next() {
                return Ok(addr.to_string());
            }
        }
    }

    Err(BridgeError::Discovery(format!(
        "no {} line found in {}",
        keyword,
        path.display()
    )))
}
