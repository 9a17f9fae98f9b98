use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;

use seasons_common::{Catalog, Fingerprint, RuntimeConfig};

/// JSON files under `$SEASONS_DATA_DIR`, one lock for all of them.
#[derive(Clone)]
pub struct AppStore {
    runtime_path: Arc<PathBuf>,
    catalog_path: Arc<PathBuf>,
    fingerprints_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl AppStore {
    pub fn new() -> Self {
        let data_dir = std::env::var("SEASONS_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.seasons"));
        Self::in_dir(data_dir)
    }

    pub fn in_dir(data_dir: PathBuf) -> Self {
        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            catalog_path: Arc::new(data_dir.join("catalog.json")),
            fingerprints_path: Arc::new(data_dir.join("fingerprints.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        Ok(self
            .read_json::<RuntimeConfig>(&self.runtime_path)
            .await?
            .unwrap_or_default())
    }

    pub async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        self.write_json(&self.runtime_path, runtime).await
    }

    /// `None` when no catalog has been stored yet.
    pub async fn load_catalog(&self) -> anyhow::Result<Option<Catalog>> {
        self.read_json::<Catalog>(&self.catalog_path).await
    }

    pub async fn save_catalog(&self, catalog: &Catalog) -> anyhow::Result<()> {
        self.write_json(&self.catalog_path, catalog).await
    }

    pub async fn load_fingerprints(&self) -> anyhow::Result<BTreeMap<String, Fingerprint>> {
        Ok(self
            .read_json::<BTreeMap<String, Fingerprint>>(&self.fingerprints_path)
            .await?
            .unwrap_or_default())
    }

    pub async fn save_fingerprints(
        &self,
        fingerprints: &BTreeMap<String, Fingerprint>,
    ) -> anyhow::Result<()> {
        self.write_json(&self.fingerprints_path, fingerprints).await
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> anyhow::Result<Option<T>> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(path).await {
            Ok(raw) => Ok(Some(serde_json::from_slice::<T>(&raw)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("seasons-store-{name}-{}", std::process::id()))
    }

    #[tokio::test]
    async fn missing_files_fall_back_to_defaults() {
        let store = AppStore::in_dir(scratch_dir("missing"));

        assert!(store.load_catalog().await.unwrap().is_none());
        assert!(store.load_fingerprints().await.unwrap().is_empty());
        assert_eq!(
            store.load_runtime_config().await.unwrap().seasons.interval_minutes,
            15
        );
    }

    #[tokio::test]
    async fn persists_fingerprints_and_catalog() {
        let dir = scratch_dir("persist");
        let store = AppStore::in_dir(dir.clone());

        let fingerprints = BTreeMap::from([(
            "climate.master_br".to_string(),
            Fingerprint::from("cool-73"),
        )]);
        store.save_fingerprints(&fingerprints).await.unwrap();
        store.save_catalog(&Catalog::example()).await.unwrap();

        assert_eq!(store.load_fingerprints().await.unwrap(), fingerprints);
        assert_eq!(
            store.load_catalog().await.unwrap(),
            Some(Catalog::example())
        );

        tokio::fs::remove_dir_all(dir).await.unwrap();
    }
}
