//! In-memory provider for testing.
//!
//! [`ScriptedProvider`] makes no external calls. It records every call it
//! receives and can be scripted to fail, panic or hang on a given method,
//! which is how the task engine's retry, panic and cancellation paths are
//! exercised.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{Provider, ServerInfo};
use crate::config::CloudConfig;

/// What a scripted call does instead of succeeding.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Return an error with this message.
    Fail(String),
    /// Panic with an `anyhow::Error` payload.
    PanicWithError(String),
    /// Panic with a plain string payload.
    Panic(String),
    /// Never complete.
    Hang,
}

#[derive(Debug, Default)]
struct Script {
    calls: Vec<String>,
    once: HashMap<String, VecDeque<Fault>>,
    always: HashMap<String, Fault>,
}

#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: Mutex<Script>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `fault` to the next `times` calls of `method`.
    pub fn fault_next(&self, method: &str, times: usize, fault: Fault) {
        let mut script = self.lock();
        let queue = script.once.entry(method.to_string()).or_default();
        queue.extend(std::iter::repeat_n(fault, times));
    }

    /// Apply `fault` to every call of `method` once the one-shot faults
    /// queued by [`fault_next`](Self::fault_next) are used up.
    pub fn fault_always(&self, method: &str, fault: Fault) {
        self.lock().always.insert(method.to_string(), fault);
    }

    pub fn clear_faults(&self) {
        let mut script = self.lock();
        script.once.clear();
        script.always.clear();
    }

    /// Every call received so far, as `"<method> <args>"`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of calls received for `method`.
    pub fn call_count(&self, method: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.split(' ').next() == Some(method))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, method: &str, args: String) -> anyhow::Result<()> {
        let fault = {
            let mut script = self.lock();
            script.calls.push(format!("{method} {args}"));
            match script.once.get_mut(method).and_then(VecDeque::pop_front) {
                Some(fault) => Some(fault),
                None => script.always.get(method).cloned(),
            }
        };

        match fault {
            None => Ok(()),
            Some(Fault::Fail(message)) => Err(anyhow::anyhow!(message)),
            Some(Fault::PanicWithError(message)) => std::panic::panic_any(anyhow::anyhow!(message)),
            Some(Fault::Panic(message)) => panic!("{message}"),
            Some(Fault::Hang) => std::future::pending().await,
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn create_namespace(&self, namespace: &str) -> anyhow::Result<()> {
        self.enter("create_namespace", namespace.to_string()).await
    }

    async fn delete_namespace(&self, namespace: &str) -> anyhow::Result<()> {
        self.enter("delete_namespace", namespace.to_string()).await
    }

    async fn create_service(&self, namespace: &str, name: &str) -> anyhow::Result<()> {
        self.enter("create_service", format!("{namespace}/{name}"))
            .await
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> anyhow::Result<()> {
        self.enter("delete_service", format!("{namespace}/{name}"))
            .await
    }

    async fn create_replication_controller(
        &self,
        namespace: &str,
        name: &str,
        replicas: u32,
    ) -> anyhow::Result<()> {
        self.enter(
            "create_replication_controller",
            format!("{namespace}/{name} x{replicas}"),
        )
        .await
    }

    async fn delete_replication_controller(
        &self,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<()> {
        self.enter("delete_replication_controller", format!("{namespace}/{name}"))
            .await
    }

    async fn create_volume(
        &self,
        _cloud: &CloudConfig,
        name: &str,
        size_gb: u32,
    ) -> anyhow::Result<String> {
        self.enter("create_volume", format!("{name} {size_gb}"))
            .await?;
        Ok(format!("vol-{name}"))
    }

    async fn resize_volume(&self, volume_id: &str, size_gb: u32) -> anyhow::Result<()> {
        self.enter("resize_volume", format!("{volume_id} {size_gb}"))
            .await
    }

    async fn delete_volume(&self, volume_id: &str) -> anyhow::Result<()> {
        self.enter("delete_volume", volume_id.to_string()).await
    }

    async fn create_server(
        &self,
        _cloud: &CloudConfig,
        id: &str,
        class: &str,
    ) -> anyhow::Result<ServerInfo> {
        self.enter("create_server", format!("{id} {class}")).await?;
        Ok(ServerInfo {
            name: format!("{id}.cluster.local"),
            external_ip: "203.0.113.10".to_string(),
        })
    }

    async fn delete_server(&self, id: &str) -> anyhow::Result<()> {
        self.enter("delete_server", id.to_string()).await
    }

    async fn create_load_balancer(
        &self,
        _cloud: &CloudConfig,
        name: &str,
    ) -> anyhow::Result<String> {
        self.enter("create_load_balancer", name.to_string()).await?;
        Ok(format!("{name}.elb.example.com"))
    }

    async fn delete_load_balancer(&self, name: &str) -> anyhow::Result<()> {
        self.enter("delete_load_balancer", name.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_in_order() {
        let provider = ScriptedProvider::new();
        provider.create_namespace("web").await.unwrap();
        provider.delete_server("i-1").await.unwrap();

        assert_eq!(
            provider.calls(),
            vec!["create_namespace web", "delete_server i-1"]
        );
        assert_eq!(provider.call_count("delete_server"), 1);
    }

    #[tokio::test]
    async fn one_shot_faults_run_out() {
        let provider = ScriptedProvider::new();
        provider.fault_next("delete_server", 2, Fault::Fail("api down".into()));

        assert!(provider.delete_server("i-1").await.is_err());
        let err = provider.delete_server("i-1").await.unwrap_err();
        assert_eq!(err.to_string(), "api down");
        assert!(provider.delete_server("i-1").await.is_ok());
    }

    #[tokio::test]
    async fn one_shot_faults_take_precedence_over_always() {
        let provider = ScriptedProvider::new();
        provider.fault_always("delete_volume", Fault::Fail("always".into()));
        provider.fault_next("delete_volume", 1, Fault::Fail("once".into()));

        let first = provider.delete_volume("vol-1").await.unwrap_err();
        let second = provider.delete_volume("vol-1").await.unwrap_err();
        assert_eq!(first.to_string(), "once");
        assert_eq!(second.to_string(), "always");

        provider.clear_faults();
        assert!(provider.delete_volume("vol-1").await.is_ok());
    }
}
