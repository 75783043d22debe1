//! Provider factory: adapter registry plus per-row adapter cache.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{ConnectionTest, Gns3Provider, GuacamoleProvider, LabProvider, GNS3, GUACAMOLE};
use crate::config::RequestConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::storage::{
    HealthStatus, NewProvider, ProviderRecord, ProviderUpdate, SqliteStorage, Storage,
};

/// Builds an adapter from a stored JSON config.
pub type ProviderBuilder =
    Arc<dyn Fn(&Value, &RequestConfig) -> ProviderResult<Arc<dyn LabProvider>> + Send + Sync>;

/// A configured provider row together with its live adapter.
#[derive(Clone)]
pub struct ProviderHandle {
    /// The provider row the adapter was built from.
    pub record: ProviderRecord,
    /// The adapter.
    pub adapter: Arc<dyn LabProvider>,
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("id", &self.record.id)
            .field("name", &self.record.name)
            .field("provider_type", &self.adapter.provider_type())
            .finish()
    }
}

/// Instantiates lab provider adapters from persisted configuration.
pub struct ProviderFactory {
    storage: SqliteStorage,
    request: RequestConfig,
    builders: RwLock<HashMap<String, ProviderBuilder>>,
    cache: RwLock<HashMap<i64, ProviderHandle>>,
}

impl ProviderFactory {
    /// Create a factory with the GNS3 and Guacamole adapters registered.
    pub fn new(storage: SqliteStorage, request: RequestConfig) -> Self {
        let factory = Self {
            storage,
            request,
            builders: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
        };

        factory.register(
            GNS3,
            Arc::new(|config: &Value, request: &RequestConfig| {
                Ok(Arc::new(Gns3Provider::from_value(config, request)?) as Arc<dyn LabProvider>)
            }),
        );
        factory.register(
            GUACAMOLE,
            Arc::new(|config: &Value, request: &RequestConfig| {
                Ok(Arc::new(GuacamoleProvider::from_value(config, request)?) as Arc<dyn LabProvider>)
            }),
        );
        factory
    }

    /// Register (or replace) the builder for a provider type.
    pub fn register(&self, provider_type: &str, builder: ProviderBuilder) {
        let key = provider_type.to_ascii_lowercase();
        debug!(provider_type = %key, "Registering provider adapter");
        self.builders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, builder);
    }

    /// Registered provider types, sorted.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .builders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    /// Build an adapter of `provider_type` from `config`.
    pub fn create(&self, provider_type: &str, config: &Value) -> ProviderResult<Arc<dyn LabProvider>> {
        let key = provider_type.trim().to_ascii_lowercase();
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ProviderError::InvalidType {
                provider_type: provider_type.to_string(),
            });
        }

        let builder = self
            .builders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
            .ok_or_else(|| ProviderError::NotRegistered {
                provider_type: key.clone(),
            })?;

        builder(config, &self.request)
    }

    /// Adapter for the provider row `id`.
    pub async fn get(&self, id: i64) -> ProviderResult<ProviderHandle> {
        if let Some(handle) = self.cached(id) {
            return Ok(handle);
        }

        let record = self
            .storage
            .get_provider(id)
            .await?
            .ok_or(ProviderError::NotFound { id })?;
        self.instantiate(record)
    }

    /// Adapter for the default provider, falling back to the first active one.
    pub async fn get_default(&self) -> ProviderResult<ProviderHandle> {
        let record = self
            .storage
            .get_default_provider()
            .await?
            .ok_or(ProviderError::NoActiveProviders)?;
        self.get_record(record)
    }

    /// Adapter for the active provider of `provider_type`, preferring its default.
    pub async fn get_by_type(&self, provider_type: &str) -> ProviderResult<ProviderHandle> {
        let record = self
            .storage
            .get_provider_by_type(&provider_type.to_ascii_lowercase())
            .await?
            .ok_or_else(|| ProviderError::TypeNotFound {
                provider_type: provider_type.to_string(),
            })?;
        self.get_record(record)
    }

    /// Persist a new provider after checking its config instantiates.
    pub async fn save(&self, provider: &NewProvider) -> ProviderResult<i64> {
        let mut provider = provider.clone();
        provider.provider_type = provider.provider_type.trim().to_ascii_lowercase();
        self.create(&provider.provider_type, &provider.config)?;

        let id = self.storage.insert_provider(&provider).await?;
        if provider.is_default {
            self.clear_cache();
        }

        info!(
            provider_id = id,
            name = %provider.name,
            provider_type = %provider.provider_type,
            is_default = provider.is_default,
            "Provider saved"
        );
        Ok(id)
    }

    /// Apply a partial update. Returns false when the row does not exist.
    pub async fn update(&self, id: i64, update: &ProviderUpdate) -> ProviderResult<bool> {
        if let Some(config) = &update.config {
            let Some(record) = self.storage.get_provider(id).await? else {
                return Ok(false);
            };
            self.create(&record.provider_type, config)
                .map_err(|e| ProviderError::InvalidConfig {
                    id,
                    message: e.to_string(),
                })?;
        }

        let updated = self.storage.update_provider(id, update).await?;
        if update.is_default == Some(true) {
            self.clear_cache();
        } else {
            self.evict(id);
        }

        if updated {
            info!(provider_id = id, "Provider updated");
        }
        Ok(updated)
    }

    /// Delete a provider that no open session uses.
    pub async fn delete(&self, id: i64) -> ProviderResult<bool> {
        let count = self.storage.count_open_sessions_for_provider(id).await?;
        if count > 0 {
            return Err(ProviderError::HasActiveSessions { id, count });
        }

        let deleted = self.storage.delete_provider(id).await?;
        self.evict(id);
        if deleted {
            info!(provider_id = id, "Provider deleted");
        }
        Ok(deleted)
    }

    /// Make `id` the default of its type.
    pub async fn set_default(&self, id: i64) -> ProviderResult<bool> {
        let switched = self.storage.set_default_provider(id).await?;
        if !switched {
            return Err(ProviderError::NotFound { id });
        }

        self.clear_cache();
        info!(provider_id = id, "Default provider set");
        Ok(true)
    }

    /// Run the adapter's connection test and record the outcome.
    pub async fn test(&self, id: i64) -> ProviderResult<ConnectionTest> {
        let handle = self.get(id).await?;
        let result = handle.adapter.test_connection().await;
        let status = if result.success {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        self.storage
            .update_provider_health(id, status, Some(&result.message), Utc::now())
            .await?;
        self.evict(id);

        if result.success {
            info!(provider_id = id, message = %result.message, "Provider connection test passed");
        } else {
            warn!(provider_id = id, message = %result.message, "Provider connection test failed");
        }
        Ok(result)
    }

    /// Configured providers.
    pub async fn list(&self, active_only: bool) -> ProviderResult<Vec<ProviderRecord>> {
        Ok(self.storage.list_providers(active_only).await?)
    }

    fn get_record(&self, record: ProviderRecord) -> ProviderResult<ProviderHandle> {
        match self.cached(record.id) {
            Some(handle) => Ok(handle),
            None => self.instantiate(record),
        }
    }

    fn instantiate(&self, record: ProviderRecord) -> ProviderResult<ProviderHandle> {
        let id = record.id;
        if !record.config.is_object() {
            return Err(ProviderError::InvalidConfig {
                id,
                message: "configuration is not a JSON object".to_string(),
            });
        }

        let adapter = self
            .create(&record.provider_type, &record.config)
            .map_err(|e| ProviderError::InvalidConfig {
                id,
                message: e.to_string(),
            })?;

        debug!(provider_id = id, provider_type = %record.provider_type, "Provider adapter instantiated");
        let handle = ProviderHandle { record, adapter };
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle.clone());
        Ok(handle)
    }

    fn cached(&self, id: i64) -> Option<ProviderHandle> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn evict(&self, id: i64) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    fn clear_cache(&self) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
