//! Runtime environment detection
//!
//! Works out whether this process runs inside a container and which default
//! gateway it sees. The probe reads files below a configurable root so it can
//! be pointed at a fake filesystem.

use serde::Serialize;
use std::fs;
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Bridge gateways tried when the detected gateway does not answer
pub const COMMON_BRIDGE_GATEWAYS: [Ipv4Addr; 3] = [
    Ipv4Addr::new(172, 17, 0, 1),
    Ipv4Addr::new(172, 18, 0, 1),
    Ipv4Addr::new(172, 19, 0, 1),
];

/// Alias for the container host on Docker Desktop
pub const HOST_GATEWAY_ALIAS: &str = "host.docker.internal";

const GATEWAY_ALIAS: &str = "gateway.docker.internal";

/// What the probe found about the running process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentFacts {
    pub in_container: bool,
    pub default_gateway: Option<Ipv4Addr>,
    pub platform: String,
}

impl EnvironmentFacts {
    /// Facts for a plain host process, used when probing is not wanted
    pub fn host() -> Self {
        Self {
            in_container: false,
            default_gateway: None,
            platform: std::env::consts::OS.to_string(),
        }
    }

    /// Addresses that may reach the container host, most likely first
    ///
    /// The detected gateway (or the default bridge gateway) comes right after
    /// the gateway alias; duplicates are dropped.
    pub fn gateway_addresses(&self) -> Vec<String> {
        let detected = self.default_gateway.unwrap_or(COMMON_BRIDGE_GATEWAYS[0]);

        let mut addresses = vec![GATEWAY_ALIAS.to_string(), detected.to_string()];
        for gateway in COMMON_BRIDGE_GATEWAYS {
            let gateway = gateway.to_string();
            if !addresses.contains(&gateway) {
                addresses.push(gateway);
            }
        }
        addresses
    }
}

/// Reads container markers and the routing table
#[derive(Debug, Clone)]
pub struct EnvironmentProbe {
    root: PathBuf,
    docker_env: Option<String>,
    process_id: u32,
}

impl EnvironmentProbe {
    /// Probe the real process environment
    pub fn system() -> Self {
        Self {
            root: PathBuf::from("/"),
            docker_env: std::env::var("DOCKER_ENV").ok(),
            process_id: std::process::id(),
        }
    }

    /// Probe a filesystem rooted elsewhere, ignoring the process environment
    pub fn at_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            docker_env: None,
            process_id: 0,
        }
    }

    pub fn with_docker_env(mut self, value: impl Into<String>) -> Self {
        self.docker_env = Some(value.into());
        self
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative.trim_start_matches('/'))
    }

    fn file_mentions_docker(&self, relative: &str) -> bool {
        fs::read_to_string(self.path(relative))
            .map(|content| content.contains("docker"))
            .unwrap_or(false)
    }

    /// Any container marker counts; unreadable files count as absent
    pub fn in_container(&self) -> bool {
        self.docker_env.as_deref() == Some("true")
            || self.path("/.dockerenv").exists()
            || self.file_mentions_docker("/proc/1/cgroup")
            || (self.process_id == 1 && cfg!(target_os = "linux"))
            || self.file_mentions_docker("/proc/self/mountinfo")
    }

    pub fn default_gateway(&self) -> Option<Ipv4Addr> {
        let table = fs::read_to_string(self.path("/proc/net/route")).ok()?;
        parse_default_gateway(&table)
    }

    pub fn detect(&self) -> EnvironmentFacts {
        EnvironmentFacts {
            in_container: self.in_container(),
            default_gateway: self.default_gateway(),
            platform: std::env::consts::OS.to_string(),
        }
    }
}

/// Find the default route's gateway in `/proc/net/route` content
///
/// Addresses in the table are little-endian hex, so `0100A8C0` is
/// `192.168.0.1`. A default route without a gateway is skipped.
pub fn parse_default_gateway(table: &str) -> Option<Ipv4Addr> {
    table.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [_, "00000000", gateway, ..] if *gateway != "00000000" => u32::from_str_radix(gateway, 16)
                .ok()
                .map(|value| Ipv4Addr::from(value.to_le_bytes())),
            _ => None,
        }
    })
}
