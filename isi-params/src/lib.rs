//! Parameter store (C11).
//!
//! Grouped maps (`session`, `monitor`, `stimulus`, `camera`,
//! `acquisition`, `analysis`), each validated against a small schema,
//! persisted as JSON with a `.backup` rotated on every write, with
//! per-group change subscribers.

mod defaults;
mod schema;

pub use schema::{ParamKind, ParamSpec};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error("unknown parameter group: {0}")]
    UnknownGroup(String),
    #[error("unknown parameter key '{key}' in group '{group}'")]
    UnknownKey { group: &'static str, key: String },
    #[error("invalid value for '{group}.{key}': {value}")]
    InvalidValue {
        group: &'static str,
        key: String,
        value: Value,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ParamsError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamGroup {
    Session,
    Monitor,
    Stimulus,
    Camera,
    Acquisition,
    Analysis,
}

impl ParamGroup {
    pub const ALL: [ParamGroup; 6] = [
        ParamGroup::Session,
        ParamGroup::Monitor,
        ParamGroup::Stimulus,
        ParamGroup::Camera,
        ParamGroup::Acquisition,
        ParamGroup::Analysis,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ParamGroup::Session => "session",
            ParamGroup::Monitor => "monitor",
            ParamGroup::Stimulus => "stimulus",
            ParamGroup::Camera => "camera",
            ParamGroup::Acquisition => "acquisition",
            ParamGroup::Analysis => "analysis",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| ParamsError::UnknownGroup(s.to_string()))
    }
}

/// On-disk document shape fixed by §6: `current` and `default` sections
/// mirroring the group structure.
#[derive(Debug, Serialize, Deserialize)]
struct ParamDocument {
    current: HashMap<String, Map<String, Value>>,
    default: HashMap<String, Map<String, Value>>,
}

pub type Subscriber = Box<dyn Fn(&[String]) + Send + Sync>;

struct Inner {
    current: HashMap<ParamGroup, Map<String, Value>>,
    default: HashMap<ParamGroup, Map<String, Value>>,
    subscribers: HashMap<ParamGroup, Vec<Subscriber>>,
}

/// The parameter store itself. Reads take a snapshot under a read lock;
/// updates take a write lock, validate against the schema, persist, and
/// then invoke subscribers for the changed group with the changed keys.
pub struct ParamStore {
    path: Option<PathBuf>,
    inner: RwLock<Inner>,
}

impl ParamStore {
    /// A store seeded entirely from built-in defaults, not backed by a
    /// file. Useful for tests and for `reset_to_defaults` semantics when
    /// no path was ever configured.
    pub fn in_memory() -> Self {
        let mut current = HashMap::new();
        let mut default = HashMap::new();
        for group in ParamGroup::ALL {
            let d = defaults::defaults_for(group);
            current.insert(group, d.clone());
            default.insert(group, d);
        }
        Self {
            path: None,
            inner: RwLock::new(Inner {
                current,
                default,
                subscribers: HashMap::new(),
            }),
        }
    }

    /// Load from `path` if it exists, otherwise seed with defaults and
    /// write them out.
    pub fn load_or_init(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let store = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            let doc: ParamDocument = serde_json::from_str(&text)?;
            let mut current = HashMap::new();
            let mut default = HashMap::new();
            for group in ParamGroup::ALL {
                let c = doc
                    .current
                    .get(group.as_str())
                    .cloned()
                    .unwrap_or_else(|| defaults::defaults_for(group));
                let d = doc
                    .default
                    .get(group.as_str())
                    .cloned()
                    .unwrap_or_else(|| defaults::defaults_for(group));
                current.insert(group, c);
                default.insert(group, d);
            }
            Self {
                path: Some(path),
                inner: RwLock::new(Inner {
                    current,
                    default,
                    subscribers: HashMap::new(),
                }),
            }
        } else {
            let mut store = Self::in_memory();
            store.path = Some(path);
            store.persist()?;
            store
        };
        Ok(store)
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let inner = self.inner.read();
        let current = inner
            .current
            .iter()
            .map(|(g, v)| (g.as_str().to_string(), v.clone()))
            .collect();
        let default = inner
            .default
            .iter()
            .map(|(g, v)| (g.as_str().to_string(), v.clone()))
            .collect();
        drop(inner);
        let doc = ParamDocument { current, default };
        let text = serde_json::to_string_pretty(&doc)?;

        if path.exists() {
            let backup = path.with_extension("json.backup");
            std::fs::copy(path, &backup)?;
        }

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn get_all(&self) -> HashMap<ParamGroup, Map<String, Value>> {
        self.inner.read().current.clone()
    }

    pub fn get_group(&self, group: ParamGroup) -> Map<String, Value> {
        self.inner
            .read()
            .current
            .get(&group)
            .cloned()
            .unwrap_or_default()
    }

    pub fn schema(&self, group: ParamGroup) -> Vec<ParamSpec> {
        defaults::schema_for(group)
    }

    /// Validate then apply `updates` to `group`. All keys must exist in
    /// the schema and pass validation or nothing is applied. On success,
    /// persists to disk (if backed by one) and invokes subscribers with
    /// the set of changed keys (keys whose value actually differed).
    pub fn update_group(&self, group: ParamGroup, updates: Map<String, Value>) -> Result<Vec<String>> {
        let spec = defaults::schema_for(group);
        for (key, value) in &updates {
            let field = spec
                .iter()
                .find(|s| s.name == key)
                .ok_or_else(|| ParamsError::UnknownKey {
                    group: group.as_str(),
                    key: key.clone(),
                })?;
            if !field.validate(value) {
                return Err(ParamsError::InvalidValue {
                    group: group.as_str(),
                    key: key.clone(),
                    value: value.clone(),
                });
            }
        }

        let changed_keys = {
            let mut inner = self.inner.write();
            let current = inner.current.entry(group).or_default();
            let mut changed = Vec::new();
            for (key, value) in &updates {
                if current.get(key) != Some(value) {
                    changed.push(key.clone());
                }
                current.insert(key.clone(), value.clone());
            }
            changed
        };

        if !changed_keys.is_empty() {
            self.persist()?;
            self.notify(group, &changed_keys);
        }
        Ok(changed_keys)
    }

    pub fn reset_to_defaults(&self) -> Result<()> {
        let changed_by_group: Vec<(ParamGroup, Vec<String>)> = {
            let mut inner = self.inner.write();
            let mut out = Vec::new();
            for group in ParamGroup::ALL {
                let default = inner.default.get(&group).cloned().unwrap_or_default();
                let current = inner.current.entry(group).or_default();
                let changed: Vec<String> = default
                    .iter()
                    .filter(|(k, v)| current.get(*k) != Some(*v))
                    .map(|(k, _)| k.clone())
                    .collect();
                *current = default;
                if !changed.is_empty() {
                    out.push((group, changed));
                }
            }
            out
        };
        self.persist()?;
        for (group, keys) in changed_by_group {
            self.notify(group, &keys);
        }
        Ok(())
    }

    /// Register a subscriber for `group`, invoked with the changed keys
    /// whenever `update_group`/`reset_to_defaults` changes that group.
    pub fn subscribe(&self, group: ParamGroup, callback: Subscriber) {
        self.inner.write().subscribers.entry(group).or_default().push(callback);
    }

    fn notify(&self, group: ParamGroup, changed_keys: &[String]) {
        let inner = self.inner.read();
        if let Some(subs) = inner.subscribers.get(&group) {
            for sub in subs {
                sub(changed_keys);
            }
        }
    }
}
