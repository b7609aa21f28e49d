//! Builds the set of reachable plugins from config and hands out shared
//! handles to the phase pipeline. Built once at startup (and again on a
//! config reload); immutable in between so worker tasks can hold an `Arc`
//! without synchronization.

use crate::dispatch::PluginHandle;
use crate::ffi::FfiTransport;
use crate::messaging::MessagingTransport;
use nylon_core::error::NylonError;
use nylon_core::plugin_def::{MessagingBus, PluginDefinition, Transport};
use std::collections::HashMap;
use std::sync::Arc;

pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn PluginHandle>>,
}

impl PluginRegistry {
    /// Loads every `PluginDefinition`, resolving `Messaging` transports
    /// against the matching `MessagingBus` by `bus_ref`, and runs each
    /// plugin's `initialize()` before it is considered live.
    pub async fn build(
        definitions: &[PluginDefinition],
        buses: &[MessagingBus],
    ) -> Result<Self, NylonError> {
        let mut plugins: HashMap<String, Arc<dyn PluginHandle>> = HashMap::new();

        for def in definitions {
            let handle: Arc<dyn PluginHandle> = match &def.transport {
                Transport::Ffi { file_path } => {
                    let transport = unsafe { FfiTransport::load(def.name.clone(), file_path)? };
                    Arc::new(transport)
                }
                Transport::Messaging { bus_ref, .. } => {
                    let bus = buses.iter().find(|b| &b.name == bus_ref).ok_or_else(|| {
                        NylonError::ConfigError(format!(
                            "plugin '{}' references unknown messaging bus '{bus_ref}'",
                            def.name
                        ))
                    })?;
                    let transport = MessagingTransport::connect(
                        def.name.clone(),
                        &bus.servers,
                        bus.subject_prefix.clone(),
                        bus.request_timeout_ms,
                        bus.retry.clone(),
                    )
                    .await?;
                    Arc::new(transport)
                }
            };

            handle.initialize(&def.initial_config).await?;
            tracing::info!(plugin = %def.name, "plugin registered");
            plugins.insert(def.name.clone(), handle);
        }

        Ok(Self { plugins })
    }

    /// Build a registry directly from already-live handles, bypassing
    /// config resolution. Used by tests and by callers embedding Nylon that
    /// construct their own transports.
    pub fn from_handles(plugins: HashMap<String, Arc<dyn PluginHandle>>) -> Self {
        Self { plugins }
    }

    /// Folds a set of pre-built handles (e.g. built-in modifiers) into an
    /// already-resolved registry. A config-defined plugin takes precedence
    /// over a built-in of the same name so deployments can override one.
    pub fn merge_handles(mut self, builtins: HashMap<String, Arc<dyn PluginHandle>>) -> Self {
        for (name, handle) in builtins {
            self.plugins.entry(name).or_insert(handle);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PluginHandle>> {
        self.plugins.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub async fn shutdown_all(&self) {
        for (name, handle) in &self.plugins {
            if let Err(err) = handle.shutdown().await {
                tracing::warn!(plugin = %name, error = %err, "plugin shutdown failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nylon_core::session::{DispatchFlags, Phase, PhaseTerminal};

    struct MockHandle {
        name: String,
    }

    #[async_trait]
    impl PluginHandle for MockHandle {
        fn name(&self) -> &str {
            &self.name
        }

        async fn dispatch(
            &self,
            _entry: &str,
            _phase: Phase,
            _session_id: u32,
            _request_id: &str,
            _payload_bytes: &[u8],
            _data_bytes: &[u8],
        ) -> Result<(DispatchFlags, Vec<u8>), NylonError> {
            Ok((DispatchFlags { http_end: false, terminal: PhaseTerminal::Next }, Vec::new()))
        }

        async fn initialize(&self, _initial_config: &serde_json::Value) -> Result<(), NylonError> {
            Ok(())
        }

        async fn shutdown(&self) -> Result<(), NylonError> {
            Ok(())
        }
    }

    #[test]
    fn empty_registry_reports_empty() {
        let reg = PluginRegistry { plugins: HashMap::new() };
        assert!(reg.is_empty());
        assert_eq!(reg.len(), 0);
        assert!(reg.get("nonexistent").is_none());
    }

    #[tokio::test]
    async fn get_returns_a_cloned_handle() {
        let mut plugins: HashMap<String, Arc<dyn PluginHandle>> = HashMap::new();
        plugins.insert("mock".into(), Arc::new(MockHandle { name: "mock".into() }));
        let reg = PluginRegistry { plugins };
        let handle = reg.get("mock").expect("registered");
        assert_eq!(handle.name(), "mock");
        assert!(reg.get("missing").is_none());
    }

    #[tokio::test]
    async fn shutdown_all_tolerates_individual_failures() {
        struct FailingHandle;
        #[async_trait]
        impl PluginHandle for FailingHandle {
            fn name(&self) -> &str {
                "failing"
            }
            async fn dispatch(
                &self,
                _entry: &str,
                _phase: Phase,
                _session_id: u32,
                _request_id: &str,
                _payload_bytes: &[u8],
                _data_bytes: &[u8],
            ) -> Result<(DispatchFlags, Vec<u8>), NylonError> {
                unreachable!()
            }
            async fn initialize(&self, _initial_config: &serde_json::Value) -> Result<(), NylonError> {
                Ok(())
            }
            async fn shutdown(&self) -> Result<(), NylonError> {
                Err(NylonError::PluginUnavailable("gone".into()))
            }
        }

        let mut plugins: HashMap<String, Arc<dyn PluginHandle>> = HashMap::new();
        plugins.insert("failing".into(), Arc::new(FailingHandle));
        let reg = PluginRegistry { plugins };
        reg.shutdown_all().await;
    }
}
