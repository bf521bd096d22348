//! Cache deployment topology selection.
//!
//! Priority: cluster nodes, then sentinels, then the single endpoint.

use crate::config::Config;
use crate::error::{OverlayError, Result};
use std::fmt;

pub const DEFAULT_SENTINEL_SERVICE: &str = "mymaster";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

impl NodeAddr {
    /// Parse a `host:port` entry. IPv6 hosts must be bracketed (`[::1]:26379`).
    pub fn parse(entry: &str) -> Result<Self> {
        let entry = entry.trim();
        let (host, port) = entry.rsplit_once(':').ok_or_else(|| {
            OverlayError::TopologyMisconfigured(format!("'{entry}' is not in host:port form"))
        })?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(OverlayError::TopologyMisconfigured(format!(
                "'{entry}' has an empty host"
            )));
        }
        let port = port.parse::<u16>().map_err(|_| {
            OverlayError::TopologyMisconfigured(format!("'{entry}' has an invalid port"))
        })?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn to_url(&self) -> String {
        if self.host.contains(':') {
            format!("redis://[{}]:{}", self.host, self.port)
        } else {
            format!("redis://{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    Single { url: String },
    Cluster { nodes: Vec<NodeAddr> },
    Sentinel { sentinels: Vec<NodeAddr>, service: String },
}

impl Topology {
    /// Pick the topology described by the process settings.
    pub fn select(config: &Config) -> Result<Self> {
        Self::from_parts(
            &config.redis_url,
            config.redis_cluster_nodes.as_deref(),
            config.redis_sentinels.as_deref(),
            config.redis_sentinel_service.as_deref(),
        )
    }

    pub fn from_parts(
        url: &str,
        cluster_nodes: Option<&str>,
        sentinels: Option<&str>,
        sentinel_service: Option<&str>,
    ) -> Result<Self> {
        let cluster_nodes = non_empty(cluster_nodes);
        let sentinels = non_empty(sentinels);
        let sentinel_service = non_empty(sentinel_service);

        if sentinel_service.is_some() && sentinels.is_none() {
            return Err(OverlayError::TopologyMisconfigured(
                "REDIS_SENTINEL_SERVICE is set but REDIS_SENTINELS is empty".into(),
            ));
        }

        if let Some(list) = cluster_nodes {
            if sentinels.is_some() {
                tracing::warn!("Both cluster nodes and sentinels configured; using cluster mode");
            }
            return Ok(Topology::Cluster {
                nodes: parse_list(list, "REDIS_CLUSTER_NODES")?,
            });
        }

        if let Some(list) = sentinels {
            return Ok(Topology::Sentinel {
                sentinels: parse_list(list, "REDIS_SENTINELS")?,
                service: sentinel_service
                    .unwrap_or(DEFAULT_SENTINEL_SERVICE)
                    .to_string(),
            });
        }

        let url = url.trim();
        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(OverlayError::TopologyMisconfigured(
                "REDIS_URL must start with 'redis://' or 'rediss://'".into(),
            ));
        }
        Ok(Topology::Single {
            url: url.to_string(),
        })
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Topology::Single { .. } => "single",
            Topology::Cluster { .. } => "cluster",
            Topology::Sentinel { .. } => "sentinel",
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_list(list: &str, variable: &str) -> Result<Vec<NodeAddr>> {
    list.split(',')
        .map(|entry| {
            if entry.trim().is_empty() {
                Err(OverlayError::TopologyMisconfigured(format!(
                    "{variable} contains an empty entry"
                )))
            } else {
                NodeAddr::parse(entry)
            }
        })
        .collect()
}
