// SPDX-License-Identifier: Apache-2.0

//! The external resource-provider capability (spec.md §9: the YARN/libyarn
//! branch generalized to a trait object so the core never depends on a
//! concrete provider implementation).

use async_trait::async_trait;
use otap_df_rm_config::RmError;

/// A request to acquire containers from an external provider, one entry
/// per host the pool wants capacity on.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerRequest {
    /// The host to request containers on.
    pub host: String,
    /// Memory per container, in megabytes.
    pub memory_mb: u32,
    /// Cores per container.
    pub core: f64,
    /// How many containers of this shape to request on this host.
    pub count: u32,
}

/// A container grant or revocation reported back by the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerStatus {
    /// The provider's own container identifier.
    pub container_id: String,
    /// The host the container runs on.
    pub host: String,
    /// Memory granted, in megabytes.
    pub memory_mb: u32,
    /// Cores granted.
    pub core: f64,
    /// True if the provider has revoked/completed this container; the
    /// pool must move it out of its accepted set.
    pub revoked: bool,
}

/// The capability an external resource provider (e.g. YARN via libyarn)
/// exposes to the container lifecycle coordinator. In `ProviderMode::None`
/// the pool never calls this; a no-op/self-contained implementation is
/// appropriate there.
#[async_trait]
pub trait ResourceBroker: Send + Sync {
    /// Submits a batch of container requests. Returns once the requests
    /// have been accepted by the provider for processing; grants arrive
    /// asynchronously via [`ResourceBroker::poll_container_status`].
    async fn acquire(&self, requests: &[ContainerRequest]) -> Result<(), RmError>;

    /// Releases previously granted containers back to the provider.
    async fn release(&self, container_ids: &[String]) -> Result<(), RmError>;

    /// Polls for grants and revocations since the last call. The core
    /// calls this once per control loop tick; implementations should
    /// return promptly with whatever is available rather than blocking
    /// for new data.
    async fn poll_container_status(&self) -> Result<Vec<ContainerStatus>, RmError>;
}

/// A [`ResourceBroker`] for `ProviderMode::None`: capacity comes entirely
/// from heartbeat-reported segment totals, so acquire/release are no-ops
/// and no statuses are ever produced.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullResourceBroker;

#[async_trait]
impl ResourceBroker for NullResourceBroker {
    async fn acquire(&self, _requests: &[ContainerRequest]) -> Result<(), RmError> {
        Ok(())
    }

    async fn release(&self, _container_ids: &[String]) -> Result<(), RmError> {
        Ok(())
    }

    async fn poll_container_status(&self) -> Result<Vec<ContainerStatus>, RmError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_broker_is_inert() {
        let broker = NullResourceBroker;
        broker.acquire(&[]).await.unwrap();
        broker.release(&[]).await.unwrap();
        assert!(broker.poll_container_status().await.unwrap().is_empty());
    }
}
