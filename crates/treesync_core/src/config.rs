//! Configuration for synchronized models and collections.
//!
//! Every setting resolves per entity with the precedence
//! explicit option ([`SyncConfig`]) > type default ([`ModelDefaults`]) >
//! context default ([`SyncContext`]).

use crate::attributes::Attributes;
use crate::error::{SyncError, SyncResult};
use serde::Deserialize;
use std::sync::Arc;
use treesync_store::{Database, RemoteStore};

/// Default identifier attribute.
pub const DEFAULT_ID_ATTRIBUTE: &str = "id";

/// Plain configuration data, loadable with serde.
///
/// ```rust
/// use treesync_core::SyncSettings;
///
/// let settings: SyncSettings = serde_json::from_str(r#"{"auto_sync": false}"#).unwrap();
/// assert!(!settings.auto_sync);
/// assert_eq!(settings.id_attribute, "id");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Whether entities keep continuous listeners by default.
    pub auto_sync: bool,
    /// Identifier attribute used when a type does not name one.
    pub id_attribute: String,
    /// Host suffix recognised as a store URL.
    pub host_suffix: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            auto_sync: true,
            id_attribute: DEFAULT_ID_ATTRIBUTE.to_string(),
            host_suffix: Database::DEFAULT_HOST_SUFFIX.to_string(),
        }
    }
}

/// Application-wide defaults, passed explicitly to every constructor.
#[derive(Debug, Clone)]
pub struct SyncContext {
    database: Option<Database>,
    auto_sync: bool,
    id_attribute: String,
}

impl SyncContext {
    /// Creates a context with no database, `auto_sync` on and `"id"` as the
    /// identifier attribute.
    pub fn new() -> Self {
        Self {
            database: None,
            auto_sync: true,
            id_attribute: DEFAULT_ID_ATTRIBUTE.to_string(),
        }
    }

    /// Builds a context over `store` from loaded settings.
    pub fn from_settings(settings: &SyncSettings, store: Arc<dyn RemoteStore>) -> Self {
        Self {
            database: Some(Database::new(store).with_host_suffix(settings.host_suffix.clone())),
            auto_sync: settings.auto_sync,
            id_attribute: settings.id_attribute.clone(),
        }
    }

    /// Sets the default database.
    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }

    /// Sets the default sync mode.
    pub fn with_auto_sync(mut self, auto_sync: bool) -> Self {
        self.auto_sync = auto_sync;
        self
    }

    /// Sets the default identifier attribute.
    pub fn with_id_attribute(mut self, id_attribute: impl Into<String>) -> Self {
        self.id_attribute = id_attribute.into();
        self
    }

    /// The default database.
    pub fn database(&self) -> Option<&Database> {
        self.database.as_ref()
    }

    /// The default sync mode.
    pub fn auto_sync(&self) -> bool {
        self.auto_sync
    }

    /// The default identifier attribute.
    pub fn id_attribute(&self) -> &str {
        &self.id_attribute
    }
}

impl Default for SyncContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Settings shared by every record of one type.
#[derive(Debug, Clone, Default)]
pub struct ModelDefaults {
    /// Sync mode for the type.
    pub auto_sync: Option<bool>,
    /// Database for the type.
    pub database: Option<Database>,
    /// Identifier attribute for the type.
    pub id_attribute: Option<String>,
    /// Attribute values filled in after a record's first sync.
    pub attributes: Attributes,
}

impl ModelDefaults {
    /// Creates empty type defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the type's sync mode.
    pub fn with_auto_sync(mut self, auto_sync: bool) -> Self {
        self.auto_sync = Some(auto_sync);
        self
    }

    /// Sets the type's database.
    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }

    /// Sets the type's identifier attribute.
    pub fn with_id_attribute(mut self, id_attribute: impl Into<String>) -> Self {
        self.id_attribute = Some(id_attribute.into());
        self
    }

    /// Sets the attribute defaults.
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Per-entity options, the highest-precedence configuration level.
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    auto_sync: Option<bool>,
    database: Option<Database>,
    id_attribute: Option<String>,
}

impl SyncConfig {
    /// Creates a configuration that defers every setting.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sync mode.
    pub fn with_auto_sync(mut self, auto_sync: bool) -> Self {
        self.auto_sync = Some(auto_sync);
        self
    }

    /// Sets the database.
    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }

    /// Sets the identifier attribute.
    pub fn with_id_attribute(mut self, id_attribute: impl Into<String>) -> Self {
        self.id_attribute = Some(id_attribute.into());
        self
    }

    /// Resolves every setting against the type and context defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MissingDatabase`] if no level names a database.
    pub fn resolve(
        &self,
        defaults: &ModelDefaults,
        context: &SyncContext,
    ) -> SyncResult<ResolvedConfig> {
        let database = self
            .database
            .as_ref()
            .or(defaults.database.as_ref())
            .or(context.database())
            .cloned()
            .ok_or(SyncError::MissingDatabase)?;
        Ok(ResolvedConfig {
            auto_sync: self
                .auto_sync
                .or(defaults.auto_sync)
                .unwrap_or(context.auto_sync()),
            database,
            id_attribute: self
                .id_attribute
                .clone()
                .or_else(|| defaults.id_attribute.clone())
                .unwrap_or_else(|| context.id_attribute().to_string()),
        })
    }
}

/// The effective configuration of one entity.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Whether continuous listeners are attached.
    pub auto_sync: bool,
    /// The database the entity lives in.
    pub database: Database,
    /// The identifier attribute.
    pub id_attribute: String,
}
