//! Round-robin placement over the data-nodes discovered at startup

use dfs_common::config::{DiscoveryConfig, NetworkConfig};
use dfs_common::rpc::DataNodeClient;
use dfs_common::{DfsError, Result, WorkerId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

/// What the coordinator knows about one data-node
#[derive(Debug, Clone)]
pub struct WorkerMetadata {
    pub client: DataNodeClient,
    pub host: String,
    pub port: u16,
    /// Number of placements handed out to this worker
    pub load: u64,
}

impl WorkerMetadata {
    pub fn new(client: DataNodeClient, host: impl Into<String>, port: u16) -> Self {
        Self {
            client,
            host: host.into(),
            port,
            load: 0,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Default)]
struct Inner {
    workers: HashMap<WorkerId, WorkerMetadata>,
    /// Worker IDs in rotation order
    order: Vec<WorkerId>,
    current_idx: usize,
}

#[derive(Default)]
pub struct LoadBalancer {
    inner: Mutex<Inner>,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contact each configured worker and keep the ones that answer
    pub async fn discover(discovery: &DiscoveryConfig, network: &NetworkConfig) -> Self {
        let timeout = Duration::from_millis(discovery.lookup_timeout_ms);
        Self::connect(&discovery.addresses(), network, timeout).await
    }

    /// Ask `addresses` for `GetWorkerInfo`; unreachable workers are skipped
    pub async fn connect(addresses: &[String], network: &NetworkConfig, timeout: Duration) -> Self {
        let lb = Self::new();

        for (i, address) in addresses.iter().enumerate() {
            let Some((host, port)) = split_address(address) else {
                warn!("Skipping worker {} with malformed address {}", i, address);
                continue;
            };

            let client = DataNodeClient::new(address.clone(), network.clone());
            let lookup = client.clone().with_request_timeout(timeout);
            match lookup.get_worker_info().await {
                Ok(info) => {
                    lb.register_worker(info.worker_id, WorkerMetadata::new(client, host, port));
                    info!("Connected to worker {} at {} with ID {}", i, address, info.worker_id);
                }
                Err(e) => {
                    warn!("Failed to get worker info for worker {} at {}: {}", i, address, e);
                }
            }
        }

        if lb.is_empty() {
            warn!("No workers reachable; block allocation will fail until restart");
        }
        lb
    }

    /// Add or replace a worker
    pub fn register_worker(&self, worker_id: WorkerId, metadata: WorkerMetadata) {
        let mut inner = self.inner.lock();
        if inner.workers.insert(worker_id, metadata).is_none() {
            inner.order.push(worker_id);
            inner.order.sort();
        }
    }

    /// Next worker in rotation; every worker is visited once per cycle
    pub fn get_next_client(&self) -> Result<(WorkerId, WorkerMetadata)> {
        let mut inner = self.inner.lock();
        if inner.order.is_empty() {
            return Err(DfsError::Unavailable("no workers available".to_string()));
        }

        let idx = inner.current_idx % inner.order.len();
        inner.current_idx = (idx + 1) % inner.order.len();
        let worker_id = inner.order[idx];

        let metadata = inner
            .workers
            .get_mut(&worker_id)
            .ok_or_else(|| DfsError::InternalError(format!("worker {} missing from pool", worker_id)))?;
        metadata.load += 1;
        Ok((worker_id, metadata.clone()))
    }

    pub fn rotate(&self) -> Result<(WorkerId, WorkerMetadata)> {
        self.get_next_client()
    }

    pub fn get_client_by_worker_id(&self, worker_id: &WorkerId) -> Result<WorkerMetadata> {
        self.inner
            .lock()
            .workers
            .get(worker_id)
            .cloned()
            .ok_or_else(|| DfsError::NotFound(format!("worker {}", worker_id)))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn close(&self) {
        info!("Load balancer closed ({} workers)", self.len());
    }
}

fn split_address(address: &str) -> Option<(String, u16)> {
    let (host, port) = address.rsplit_once(':')?;
    let port = port.parse().ok()?;
    Some((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use uuid::Uuid;

    fn pool(n: usize) -> (LoadBalancer, Vec<WorkerId>) {
        let lb = LoadBalancer::new();
        let mut ids = Vec::new();
        for i in 0..n {
            let id = Uuid::new_v4();
            let address = format!("worker-{}:50051", i);
            lb.register_worker(
                id,
                WorkerMetadata::new(DataNodeClient::new(address, NetworkConfig::default()), format!("worker-{}", i), 50051),
            );
            ids.push(id);
        }
        ids.sort();
        (lb, ids)
    }

    #[test]
    fn test_round_robin_visits_each_worker_once() {
        let (lb, ids) = pool(3);

        let picked: Vec<WorkerId> = (0..3).map(|_| lb.get_next_client().unwrap().0).collect();
        assert_eq!(picked, ids);
        assert_eq!(picked.iter().collect::<HashSet<_>>().len(), 3);

        // Fourth call wraps to the first
        assert_eq!(lb.rotate().unwrap().0, ids[0]);
    }

    #[test]
    fn test_empty_pool_is_unavailable() {
        let lb = LoadBalancer::new();
        assert!(matches!(lb.get_next_client(), Err(DfsError::Unavailable(_))));
    }

    #[test]
    fn test_lookup_by_worker_id() {
        let (lb, ids) = pool(2);

        let metadata = lb.get_client_by_worker_id(&ids[1]).unwrap();
        assert!(metadata.host.starts_with("worker-"));
        assert_eq!(metadata.port, 50051);

        assert!(matches!(
            lb.get_client_by_worker_id(&Uuid::new_v4()),
            Err(DfsError::NotFound(_))
        ));
    }

    #[test]
    fn test_load_counter() {
        let (lb, ids) = pool(2);
        for _ in 0..4 {
            lb.get_next_client().unwrap();
        }
        assert_eq!(lb.get_client_by_worker_id(&ids[0]).unwrap().load, 2);
        assert_eq!(lb.get_client_by_worker_id(&ids[1]).unwrap().load, 2);
    }

    #[test]
    fn test_concurrent_rotation_stays_in_range() {
        let (lb, ids) = pool(3);
        let lb = Arc::new(lb);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lb = lb.clone();
                std::thread::spawn(move || {
                    (0..300).map(|_| lb.get_next_client().unwrap().0).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut total = 0;
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(ids.contains(&id));
                total += 1;
            }
        }
        assert_eq!(total, 2400);
        let loads: u64 = ids.iter().map(|id| lb.get_client_by_worker_id(id).unwrap().load).sum();
        assert_eq!(loads, 2400);
        // 2400 placements split evenly across 3 workers
        assert!(ids.iter().all(|id| lb.get_client_by_worker_id(id).unwrap().load == 800));
    }

    #[tokio::test]
    async fn test_unreachable_workers_skipped() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = listener.local_addr().unwrap().to_string();
        drop(listener);

        let lb = LoadBalancer::connect(
            &[dead, "not-an-address".to_string()],
            &NetworkConfig::default(),
            Duration::from_millis(200),
        )
        .await;
        assert!(lb.is_empty());
    }

    #[test]
    fn test_split_address() {
        assert_eq!(split_address("worker-0.worker-headless:50051"), Some(("worker-0.worker-headless".to_string(), 50051)));
        assert_eq!(split_address("nohost"), None);
    }
}
