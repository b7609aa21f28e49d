//! Hot-swappable configuration snapshot.
//!
//! `ConfigStore` owns the `RuntimeConfig` (immutable for the process
//! lifetime — listeners and pingora knobs are not reloadable) plus the
//! reloadable `ProxyConfig`, published behind an `ArcSwap` the same way
//! `nylon_core::router::Router` publishes its compiled route table. A
//! reload that fails validation leaves the previous snapshot in place.

use crate::loader;
use arc_swap::ArcSwap;
use nylon_core::config::{ProxyConfig, RuntimeConfig};
use nylon_core::error::NylonError;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub struct ConfigStore {
    runtime: RuntimeConfig,
    config_dir: Option<PathBuf>,
    proxy: ArcSwap<ProxyConfig>,
    version: AtomicU64,
}

impl ConfigStore {
    /// Loads the runtime file and every fragment under its `config_dir`,
    /// validating before anything is published. Fatal on failure — this is
    /// only ever called at process startup.
    pub fn load(runtime_path: &Path) -> Result<Self, NylonError> {
        let runtime = loader::load_runtime(runtime_path)?;
        let config_dir = runtime.config_dir.as_ref().map(PathBuf::from);
        let proxy = loader::load_proxy_config(config_dir.as_deref())?;

        Ok(Self {
            runtime,
            config_dir,
            proxy: ArcSwap::new(Arc::new(proxy)),
            version: AtomicU64::new(0),
        })
    }

    /// Runs the identical load+validate routine without constructing a
    /// store, for `nylon check -c <file>`.
    pub fn check(runtime_path: &Path) -> Result<(), NylonError> {
        let runtime = loader::load_runtime(runtime_path)?;
        let config_dir = runtime.config_dir.as_ref().map(PathBuf::from);
        loader::load_proxy_config(config_dir.as_deref())?;
        Ok(())
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.runtime
    }

    pub fn proxy(&self) -> Arc<ProxyConfig> {
        self.proxy.load_full()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    /// Re-reads `config_dir` and publishes the result if it validates.
    /// Returns the error and leaves the old snapshot live otherwise.
    pub fn reload(&self) -> Result<(), NylonError> {
        let proxy = loader::load_proxy_config(self.config_dir.as_deref())?;
        self.proxy.store(Arc::new(proxy));
        self.version.fetch_add(1, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("nylon-store-state-test-{:?}", std::thread::current().id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn load_publishes_initial_snapshot() {
        let dir = tempdir();
        let runtime_path = dir.join("runtime.yaml");
        std::fs::write(&runtime_path, "http:\n  - \"0.0.0.0:8080\"\n").unwrap();

        let store = ConfigStore::load(&runtime_path).unwrap();
        assert_eq!(store.version(), 0);
        assert!(store.proxy().services.is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn reload_bumps_version_and_publishes_new_snapshot() {
        let dir = tempdir();
        let config_dir = dir.join("conf.d");
        std::fs::create_dir_all(&config_dir).unwrap();
        let runtime_path = dir.join("runtime.yaml");
        std::fs::write(
            &runtime_path,
            format!("config_dir: \"{}\"\n", config_dir.display()),
        )
        .unwrap();

        let store = ConfigStore::load(&runtime_path).unwrap();
        assert!(store.proxy().services.is_empty());

        std::fs::write(
            config_dir.join("services.yaml"),
            "services:\n  - type: static\n    name: s1\n    root: /a\n",
        )
        .unwrap();
        store.reload().unwrap();
        assert_eq!(store.version(), 1);
        assert_eq!(store.proxy().services.len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn reload_rejects_invalid_config_and_keeps_old_snapshot() {
        let dir = tempdir();
        let config_dir = dir.join("conf.d");
        std::fs::create_dir_all(&config_dir).unwrap();
        let runtime_path = dir.join("runtime.yaml");
        std::fs::write(
            &runtime_path,
            format!("config_dir: \"{}\"\n", config_dir.display()),
        )
        .unwrap();
        let store = ConfigStore::load(&runtime_path).unwrap();

        std::fs::write(
            config_dir.join("routes.yaml"),
            "routes:\n  - matcher: {kind: host, value: localhost}\n    paths:\n      - patterns: [\"/\"]\n        service_ref: missing\n",
        )
        .unwrap();
        let err = store.reload();
        assert!(err.is_err());
        assert_eq!(store.version(), 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn check_does_not_construct_a_store() {
        let dir = tempdir();
        let runtime_path = dir.join("runtime.yaml");
        std::fs::write(&runtime_path, "http:\n  - \"0.0.0.0:8080\"\n").unwrap();
        ConfigStore::check(&runtime_path).unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }
}
