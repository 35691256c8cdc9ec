//! Context persistence
//!
//! Saves the session context to a local key-value store next to the run id
//! of the server that issued it. On start the stored run id is compared to
//! the server's current one: a match restores the context, anything else
//! discards it and remembers the new run id.

pub mod run_id;
pub mod store;

pub use run_id::{HttpRunIdSource, RunIdSource, StaticRunIdSource};
pub use store::{FileKeyValueStore, InMemoryKeyValueStore, KeyValueStore};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::models::EntityField;
use crate::session::SessionContext;
use crate::Result;

pub const DEFAULT_STORAGE_PREFIX: &str = "itau_consignado_";
const CONTEXT_KEY: &str = "conversation_context";
const RUN_ID_KEY: &str = "run_id";

/// Storage layout of a context. The confirmed set is stored as a list of
/// field names; the camera flag is not stored at all.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct StoredContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    preferred_treatment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    benefit_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    requested_amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    has_companion: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    companion_type: Option<String>,
    #[serde(default)]
    confirmed_entities: Vec<String>,
}

impl From<&SessionContext> for StoredContext {
    fn from(context: &SessionContext) -> Self {
        Self {
            name: context.name.clone(),
            preferred_treatment: context.preferred_treatment.clone(),
            benefit_number: context.benefit_number.clone(),
            requested_amount: context.requested_amount.clone(),
            purpose: context.purpose.clone(),
            has_companion: context.has_companion,
            companion_type: context.companion_type.clone(),
            confirmed_entities: context
                .confirmed_entities
                .iter()
                .map(|field| field.as_str().to_string())
                .collect(),
        }
    }
}

impl StoredContext {
    /// Unknown field names and confirmations of empty fields are dropped.
    fn into_context(self) -> SessionContext {
        let mut context = SessionContext {
            name: self.name,
            preferred_treatment: self.preferred_treatment,
            benefit_number: self.benefit_number,
            requested_amount: self.requested_amount,
            purpose: self.purpose,
            has_companion: self.has_companion,
            companion_type: self.companion_type,
            ..SessionContext::default()
        };

        for name in &self.confirmed_entities {
            match EntityField::parse(name) {
                Some(field) if context.confirm(field) => {}
                _ => debug!(field = %name, "Dropping stored confirmation"),
            }
        }

        context
    }
}

/// Stored context together with the run id it was saved under.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredConversation {
    pub context: SessionContext,
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    pub context: String,
    pub run_id: String,
}

impl StorageKeys {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            context: format!("{}{}", prefix, CONTEXT_KEY),
            run_id: format!("{}{}", prefix, RUN_ID_KEY),
        }
    }
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self::with_prefix(DEFAULT_STORAGE_PREFIX)
    }
}

pub struct ContextPersistenceService {
    store: Arc<dyn KeyValueStore>,
    run_ids: Arc<dyn RunIdSource>,
    keys: StorageKeys,
}

impl ContextPersistenceService {
    pub fn new(store: Arc<dyn KeyValueStore>, run_ids: Arc<dyn RunIdSource>) -> Self {
        Self::with_keys(store, run_ids, StorageKeys::default())
    }

    pub fn with_keys(
        store: Arc<dyn KeyValueStore>,
        run_ids: Arc<dyn RunIdSource>,
        keys: StorageKeys,
    ) -> Self {
        Self {
            store,
            run_ids,
            keys,
        }
    }

    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    /// Write the context, then the run id when one is given. A failed
    /// context write leaves the previous run id in place.
    pub async fn save_context(&self, context: &SessionContext, run_id: Option<&str>) -> Result<()> {
        let payload = serde_json::to_string(&StoredContext::from(context))?;
        self.store.set(&self.keys.context, &payload).await?;

        if let Some(run_id) = run_id {
            self.store.set(&self.keys.run_id, run_id).await?;
        }

        debug!(
            confirmed = context.confirmed_entities().len(),
            run_id = ?run_id,
            "Saved conversation context"
        );
        Ok(())
    }

    /// Stored context, or `None` when absent or unreadable.
    pub async fn load_context(&self) -> Result<Option<SessionContext>> {
        let Some(raw) = self.store.get(&self.keys.context).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<StoredContext>(&raw) {
            Ok(stored) => Ok(Some(stored.into_context())),
            Err(e) => {
                warn!(key = %self.keys.context, "Ignoring corrupt stored context: {}", e);
                Ok(None)
            }
        }
    }

    pub async fn load_conversation(&self) -> Result<Option<StoredConversation>> {
        let Some(context) = self.load_context().await? else {
            return Ok(None);
        };
        Ok(Some(StoredConversation {
            context,
            run_id: self.get_stored_run_id().await?,
        }))
    }

    /// Locally stored run id, no network access.
    pub async fn get_stored_run_id(&self) -> Result<Option<String>> {
        let stored = self.store.get(&self.keys.run_id).await?;
        Ok(stored
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty()))
    }

    pub async fn clear_context(&self) -> Result<()> {
        self.store.remove(&self.keys.context).await?;
        self.store.remove(&self.keys.run_id).await?;
        Ok(())
    }

    /// Restore `live` if the stored run id matches the server's current one.
    ///
    /// On mismatch (or no stored id) storage is cleared, the current run id
    /// is stored, `live` is reset and `false` is returned. A failed run-id
    /// fetch is returned as an error and leaves storage untouched.
    pub async fn rehydrate_context(&self, live: &mut SessionContext) -> Result<bool> {
        let current = self.run_ids.current_run_id().await?;
        let stored = self.get_stored_run_id().await?;

        if stored.as_deref() == Some(current.as_str()) {
            return match self.load_context().await? {
                Some(context) => {
                    *live = context;
                    info!(run_id = %current, "Rehydrated conversation context");
                    Ok(true)
                }
                None => {
                    info!(run_id = %current, "Run id matches but no context is stored");
                    Ok(false)
                }
            };
        }

        info!(
            stored = ?stored,
            current = %current,
            "Run id changed; discarding stored context"
        );
        self.clear_context().await?;
        self.store.set(&self.keys.run_id, &current).await?;
        live.reset();
        Ok(false)
    }
}
