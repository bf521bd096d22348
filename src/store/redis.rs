use super::{Connector, CounterStore, NodeAddr, Topology};
use crate::error::{OverlayError, Result};
use async_trait::async_trait;
use redis::aio::{ConnectionLike, ConnectionManager};
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{Client, RedisResult, Script};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Increment and first-hit expiry in one server-side step, so a counter can
/// never exist without its expiry. Single key, so cluster routing holds.
const INCR_WITH_EXPIRY: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
";

#[derive(Clone)]
enum RedisHandle {
    Single(ConnectionManager),
    Cluster(ClusterConnection),
}

/// Sentinel coordinates kept so a failed primary can be replaced.
struct Failover {
    connector: RedisConnector,
    sentinels: Vec<NodeAddr>,
    service: String,
    primary: Mutex<NodeAddr>,
}

/// Counter store backed by Redis, in any of the supported topologies.
///
/// Both connection kinds multiplex over a background task and reconnect on
/// their own, so each operation clones the handle instead of holding a lock
/// across I/O. Under sentinel, a failed operation also re-resolves the
/// primary and swaps the handle when it has moved.
pub struct RedisCounterStore {
    handle: RwLock<Option<RedisHandle>>,
    failover: Option<Failover>,
    script: Script,
    topology: &'static str,
    timeout: Duration,
}

impl RedisCounterStore {
    fn new(handle: RedisHandle, topology: &'static str, timeout: Duration) -> Self {
        Self {
            handle: RwLock::new(Some(handle)),
            failover: None,
            script: Script::new(INCR_WITH_EXPIRY),
            topology,
            timeout,
        }
    }

    fn with_failover(mut self, failover: Failover) -> Self {
        self.failover = Some(failover);
        self
    }

    async fn handle(&self) -> Result<RedisHandle> {
        self.handle.read().await.clone().ok_or_else(|| {
            OverlayError::StoreUnavailable("redis connection has been closed".into())
        })
    }

    /// Give sentinel a chance to move us to a new primary after `result` failed.
    async fn after<T>(&self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            if let Some(failover) = &self.failover {
                self.fail_over(failover).await;
            }
        }
        result
    }

    async fn fail_over(&self, failover: &Failover) {
        // Another request is already asking the sentinels.
        let Ok(mut primary) = failover.primary.try_lock() else {
            return;
        };

        let resolved = match failover
            .connector
            .resolve_primary(&failover.sentinels, &failover.service)
            .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(error = %e, "Could not re-resolve Redis primary");
                return;
            }
        };
        if resolved == *primary {
            tracing::debug!(primary = %resolved, "Redis primary unchanged");
            return;
        }

        match failover.connector.connect_single(&format!("{}/0", resolved.to_url())).await {
            Ok(conn) => {
                let mut handle = self.handle.write().await;
                if handle.is_none() {
                    return;
                }
                *handle = Some(RedisHandle::Single(conn));
                tracing::warn!(from = %*primary, to = %resolved, "Redis primary moved, switched connection");
                *primary = resolved;
            }
            Err(e) => {
                tracing::warn!(primary = %resolved, error = %e, "Could not connect to new Redis primary")
            }
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment_and_maybe_expire(&self, key: &str, ttl_secs: u64) -> Result<u64> {
        let result = match self.handle().await? {
            RedisHandle::Single(mut conn) => {
                let fut = incr_with_expiry(&mut conn, &self.script, key, ttl_secs);
                bounded(self.timeout, "INCR", fut).await
            }
            RedisHandle::Cluster(mut conn) => {
                let fut = incr_with_expiry(&mut conn, &self.script, key, ttl_secs);
                bounded(self.timeout, "INCR", fut).await
            }
        };
        self.after(result).await
    }

    async fn ping(&self) -> Result<()> {
        let result = match self.handle().await? {
            RedisHandle::Single(mut conn) => bounded(self.timeout, "PING", ping(&mut conn)).await,
            RedisHandle::Cluster(mut conn) => bounded(self.timeout, "PING", ping(&mut conn)).await,
        };
        self.after(result).await
    }

    async fn close(&self) -> Result<()> {
        // Dropping the last clone shuts the multiplexer down.
        match self.handle.write().await.take() {
            Some(_) => tracing::info!(topology = self.topology, "Closed Redis connection"),
            None => tracing::debug!(topology = self.topology, "Redis connection already closed"),
        }
        Ok(())
    }

    fn topology(&self) -> &'static str {
        self.topology
    }
}

async fn incr_with_expiry<C>(
    conn: &mut C,
    script: &Script,
    key: &str,
    ttl_secs: u64,
) -> RedisResult<u64>
where
    C: ConnectionLike + Send,
{
    let mut invocation = script.key(key);
    invocation.arg(ttl_secs);
    invocation.invoke_async(conn).await
}

async fn ping<C>(conn: &mut C) -> RedisResult<()>
where
    C: ConnectionLike + Send,
{
    let _: String = redis::cmd("PING").query_async(conn).await?;
    Ok(())
}

/// Run a Redis future under `timeout`, folding both failure modes into `StoreUnavailable`.
async fn bounded<T, F>(timeout: Duration, op: &str, fut: F) -> Result<T>
where
    F: Future<Output = RedisResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(OverlayError::StoreUnavailable(format!("{op} failed: {e}"))),
        Err(_) => Err(OverlayError::StoreUnavailable(format!(
            "{op} timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

fn open_client(url: &str) -> Result<Client> {
    Client::open(url).map_err(|e| {
        OverlayError::TopologyMisconfigured(format!("invalid redis url '{url}': {e}"))
    })
}

/// Opens Redis connections for a [`Topology`].
#[derive(Debug, Clone)]
pub struct RedisConnector {
    timeout: Duration,
}

impl RedisConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn connect_single(&self, url: &str) -> Result<ConnectionManager> {
        let client = open_client(url)?;
        let mut conn = bounded(self.timeout, "connect", ConnectionManager::new(client)).await?;
        bounded(self.timeout, "PING", ping(&mut conn)).await?;
        Ok(conn)
    }

    async fn connect_cluster(&self, nodes: &[NodeAddr]) -> Result<ClusterConnection> {
        let urls: Vec<String> = nodes.iter().map(NodeAddr::to_url).collect();
        let client = ClusterClient::new(urls).map_err(|e| {
            OverlayError::TopologyMisconfigured(format!("invalid cluster node list: {e}"))
        })?;
        let mut conn = bounded(
            self.timeout,
            "cluster connect",
            client.get_async_connection(),
        )
        .await?;
        bounded(self.timeout, "PING", ping(&mut conn)).await?;
        Ok(conn)
    }

    /// Ask each sentinel in turn for the current primary of `service`.
    async fn resolve_primary(&self, sentinels: &[NodeAddr], service: &str) -> Result<NodeAddr> {
        for sentinel in sentinels {
            match self.query_sentinel(sentinel, service).await {
                Ok(Some(primary)) => {
                    tracing::info!(
                        sentinel = %sentinel,
                        service,
                        primary = %primary,
                        "Resolved Redis primary"
                    );
                    return Ok(primary);
                }
                Ok(None) => {
                    tracing::warn!(sentinel = %sentinel, service, "Sentinel does not know service")
                }
                Err(e) => tracing::warn!(sentinel = %sentinel, error = %e, "Sentinel query failed"),
            }
        }

        Err(OverlayError::StoreUnavailable(format!(
            "no sentinel could resolve a primary for service '{service}'"
        )))
    }

    async fn query_sentinel(&self, sentinel: &NodeAddr, service: &str) -> Result<Option<NodeAddr>> {
        let client = open_client(&sentinel.to_url())?;
        let mut conn = bounded(
            self.timeout,
            "sentinel connect",
            client.get_multiplexed_async_connection(),
        )
        .await?;

        let primary: Option<(String, u16)> = bounded(
            self.timeout,
            "SENTINEL get-master-addr-by-name",
            redis::cmd("SENTINEL")
                .arg("get-master-addr-by-name")
                .arg(service)
                .query_async(&mut conn),
        )
        .await?;

        Ok(primary.map(|(host, port)| NodeAddr { host, port }))
    }
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self, topology: &Topology) -> Result<Arc<dyn CounterStore>> {
        let store = match topology {
            Topology::Single { url } => {
                tracing::info!(url = %url, "Connecting to Redis");
                let conn = self.connect_single(url).await?;
                RedisCounterStore::new(RedisHandle::Single(conn), topology.mode(), self.timeout)
            }
            Topology::Cluster { nodes } => {
                tracing::info!(nodes = nodes.len(), "Connecting to Redis cluster");
                let conn = self.connect_cluster(nodes).await?;
                RedisCounterStore::new(RedisHandle::Cluster(conn), topology.mode(), self.timeout)
            }
            Topology::Sentinel { sentinels, service } => {
                let primary = self.resolve_primary(sentinels, service).await?;
                let conn = self
                    .connect_single(&format!("{}/0", primary.to_url()))
                    .await?;
                RedisCounterStore::new(RedisHandle::Single(conn), topology.mode(), self.timeout)
                    .with_failover(Failover {
                        connector: self.clone(),
                        sentinels: sentinels.clone(),
                        service: service.clone(),
                        primary: Mutex::new(primary),
                    })
            }
        };

        tracing::info!(topology = topology.mode(), "Redis connection established");
        Ok(Arc::new(store))
    }
}
