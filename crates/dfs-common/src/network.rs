//! gRPC channel management shared by coordinator, data-nodes and clients

use crate::config::NetworkConfig;
use crate::error::{DfsError, Result};
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

/// Build an HTTP/2 endpoint for a `host:port` address
pub fn endpoint(address: &str, network: &NetworkConfig) -> Result<Endpoint> {
    let uri = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };
    let endpoint = Endpoint::from_shared(uri)
        .map_err(|e| DfsError::InvalidArgument(format!("invalid address {}: {}", address, e)))?
        .connect_timeout(network.connect_timeout())
        .tcp_nodelay(true);
    Ok(endpoint)
}

/// Dial `address`, failing with `Unavailable` on refusal or timeout
pub async fn connect(address: &str, network: &NetworkConfig) -> Result<Channel> {
    let channel = endpoint(address, network)?
        .connect()
        .await
        .map_err(|e| DfsError::Unavailable(format!("failed to connect to {}: {}", address, e)))?;
    debug!("Connected to {}", address);
    Ok(channel)
}

/// Run `fut` with a deadline, mapping expiry to `Timeout`
pub async fn with_timeout<T, F>(duration: Duration, what: &str, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(DfsError::Timeout(format!("{} after {:?}", what, duration))),
    }
}
