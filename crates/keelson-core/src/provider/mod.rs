//! Cloud and cluster collaborator seam.
//!
//! Operations never talk to a cloud SDK or the Kubernetes API directly;
//! they go through a [`Provider`]. The daemon ships with [`DryRunProvider`],
//! which only logs what it would do, and tests use
//! [`memory::ScriptedProvider`].

pub mod memory;

use async_trait::async_trait;
use tracing::info;

use crate::config::CloudConfig;

/// A freshly created machine.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerInfo {
    pub name: String,
    pub external_ip: String,
}

#[async_trait]
pub trait Provider: Send + Sync {
    async fn create_namespace(&self, namespace: &str) -> anyhow::Result<()>;
    async fn delete_namespace(&self, namespace: &str) -> anyhow::Result<()>;

    async fn create_service(&self, namespace: &str, name: &str) -> anyhow::Result<()>;
    async fn delete_service(&self, namespace: &str, name: &str) -> anyhow::Result<()>;

    async fn create_replication_controller(
        &self,
        namespace: &str,
        name: &str,
        replicas: u32,
    ) -> anyhow::Result<()>;
    async fn delete_replication_controller(&self, namespace: &str, name: &str)
    -> anyhow::Result<()>;

    /// Create a block volume and return its cloud id.
    async fn create_volume(
        &self,
        cloud: &CloudConfig,
        name: &str,
        size_gb: u32,
    ) -> anyhow::Result<String>;
    async fn resize_volume(&self, volume_id: &str, size_gb: u32) -> anyhow::Result<()>;
    async fn delete_volume(&self, volume_id: &str) -> anyhow::Result<()>;

    async fn create_server(
        &self,
        cloud: &CloudConfig,
        id: &str,
        class: &str,
    ) -> anyhow::Result<ServerInfo>;
    async fn delete_server(&self, id: &str) -> anyhow::Result<()>;

    /// Create a load balancer and return its public address.
    async fn create_load_balancer(&self, cloud: &CloudConfig, name: &str)
    -> anyhow::Result<String>;
    async fn delete_load_balancer(&self, name: &str) -> anyhow::Result<()>;
}

/// Provider that performs no external calls.
#[derive(Debug, Default, Clone)]
pub struct DryRunProvider;

#[async_trait]
impl Provider for DryRunProvider {
    async fn create_namespace(&self, namespace: &str) -> anyhow::Result<()> {
        info!(%namespace, "dry-run: create namespace");
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> anyhow::Result<()> {
        info!(%namespace, "dry-run: delete namespace");
        Ok(())
    }

    async fn create_service(&self, namespace: &str, name: &str) -> anyhow::Result<()> {
        info!(%namespace, %name, "dry-run: create service");
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> anyhow::Result<()> {
        info!(%namespace, %name, "dry-run: delete service");
        Ok(())
    }

    async fn create_replication_controller(
        &self,
        namespace: &str,
        name: &str,
        replicas: u32,
    ) -> anyhow::Result<()> {
        info!(%namespace, %name, replicas, "dry-run: create replication controller");
        Ok(())
    }

    async fn delete_replication_controller(
        &self,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<()> {
        info!(%namespace, %name, "dry-run: delete replication controller");
        Ok(())
    }

    async fn create_volume(
        &self,
        cloud: &CloudConfig,
        name: &str,
        size_gb: u32,
    ) -> anyhow::Result<String> {
        info!(
            zone = %cloud.availability_zone,
            %name,
            size_gb,
            "dry-run: create volume"
        );
        Ok(format!("vol-{name}"))
    }

    async fn resize_volume(&self, volume_id: &str, size_gb: u32) -> anyhow::Result<()> {
        info!(%volume_id, size_gb, "dry-run: resize volume");
        Ok(())
    }

    async fn delete_volume(&self, volume_id: &str) -> anyhow::Result<()> {
        info!(%volume_id, "dry-run: delete volume");
        Ok(())
    }

    async fn create_server(
        &self,
        cloud: &CloudConfig,
        id: &str,
        class: &str,
    ) -> anyhow::Result<ServerInfo> {
        info!(
            region = %cloud.region,
            subnet = %cloud.subnet_id,
            %id,
            %class,
            "dry-run: create server"
        );
        Ok(ServerInfo {
            name: format!("{id}.internal"),
            external_ip: "0.0.0.0".to_string(),
        })
    }

    async fn delete_server(&self, id: &str) -> anyhow::Result<()> {
        info!(%id, "dry-run: delete server");
        Ok(())
    }

    async fn create_load_balancer(
        &self,
        cloud: &CloudConfig,
        name: &str,
    ) -> anyhow::Result<String> {
        info!(
            region = %cloud.region,
            security_group = %cloud.security_group_id,
            %name,
            "dry-run: create load balancer"
        );
        Ok(format!("{name}.lb.invalid"))
    }

    async fn delete_load_balancer(&self, name: &str) -> anyhow::Result<()> {
        info!(%name, "dry-run: delete load balancer");
        Ok(())
    }
}
