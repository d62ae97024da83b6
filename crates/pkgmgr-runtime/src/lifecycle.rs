//! Per-package version/settings tracking and the cancellation tree.
//!
//! Every package entry owns a root token. Root events (version change,
//! settings change, removal) replace it, which cancels everything derived
//! from the old one. `Schedule` is a child event: it only cancels the
//! previous schedule scope of the same package.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use pkgmgr_types::Settings;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    VersionChanged = 0,
    SettingsChanged = 1,
    Schedule = 2,
    Remove = 3,
}

impl EventKind {
    pub fn is_root(self) -> bool {
        !matches!(self, EventKind::Schedule)
    }
}

/// Stable digest of a settings map, used only for equality.
pub fn settings_checksum(settings: &Settings) -> String {
    // serde_json::Map is ordered by key, so the encoding is canonical.
    let bytes = serde_json::to_vec(settings).unwrap_or_default();
    hex::encode(Sha256::digest(bytes))
}

struct Entry {
    version: String,
    pending_settings: Settings,
    settings_checksum: String,
    root: CancellationToken,
    children: HashMap<EventKind, CancellationToken>,
}

impl Entry {
    fn renew(&mut self, event: EventKind) -> CancellationToken {
        if event.is_root() {
            self.root.cancel();
            self.children.clear();
            self.root = CancellationToken::new();
            return self.root.clone();
        }
        if let Some(prev) = self.children.remove(&event) {
            prev.cancel();
        }
        let child = self.root.child_token();
        self.children.insert(event, child.clone());
        child
    }
}

/// Result of [`Store::update`]: which event renewed the context, and the
/// new context to run the follow-up work under.
#[derive(Debug, Clone)]
pub struct Renewal {
    pub event: EventKind,
    pub ctx: CancellationToken,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrySnapshot {
    pub version: String,
    pub settings_checksum: String,
    pub loaded: bool,
}

/// Lifecycle store, generic over the loaded package type.
pub struct Store<P> {
    entries: HashMap<String, Entry>,
    loaded: HashMap<String, Arc<P>>,
}

impl<P> Default for Store<P> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            loaded: HashMap::new(),
        }
    }
}

impl<P> Store<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// False when both version and settings are what the store already has.
    pub fn need_update(&self, name: &str, version: &str, settings: &Settings) -> bool {
        match self.entries.get(name) {
            None => true,
            Some(entry) => {
                entry.version != version || entry.settings_checksum != settings_checksum(settings)
            }
        }
    }

    /// Record the desired version and settings. Returns `None` when nothing
    /// changed.
    pub fn update(&mut self, name: &str, version: &str, settings: Settings) -> Option<Renewal> {
        let checksum = settings_checksum(&settings);
        let Some(entry) = self.entries.get_mut(name) else {
            let mut entry = Entry {
                version: version.to_string(),
                pending_settings: settings,
                settings_checksum: checksum,
                root: CancellationToken::new(),
                children: HashMap::new(),
            };
            let ctx = entry.renew(EventKind::VersionChanged);
            self.entries.insert(name.to_string(), entry);
            debug!(package = name, version, "lifecycle entry created");
            return Some(Renewal {
                event: EventKind::VersionChanged,
                ctx,
            });
        };

        if entry.version != version {
            entry.version = version.to_string();
            entry.pending_settings = settings;
            entry.settings_checksum = checksum;
            return Some(Renewal {
                event: EventKind::VersionChanged,
                ctx: entry.renew(EventKind::VersionChanged),
            });
        }
        if entry.settings_checksum != checksum {
            entry.pending_settings = settings;
            entry.settings_checksum = checksum;
            return Some(Renewal {
                event: EventKind::SettingsChanged,
                ctx: entry.renew(EventKind::SettingsChanged),
            });
        }
        None
    }

    /// Renew the context for `event`. `None` when the package is unknown.
    pub fn handle_event(
        &mut self,
        event: EventKind,
        name: &str,
    ) -> Option<(CancellationToken, Option<Arc<P>>)> {
        let entry = self.entries.get_mut(name)?;
        let ctx = entry.renew(event);
        if event == EventKind::Remove {
            entry.version.clear();
            entry.settings_checksum.clear();
            let loaded = self.loaded.remove(name);
            return Some((ctx, loaded));
        }
        Some((ctx, self.loaded.get(name).cloned()))
    }

    /// Free the entry. Only succeeds once the package is removed and
    /// unloaded, so an Update racing with cleanup keeps its entry.
    pub fn delete(&mut self, name: &str) -> bool {
        let removable = self
            .entries
            .get(name)
            .is_some_and(|e| e.version.is_empty() && !self.loaded.contains_key(name));
        if removable {
            self.entries.remove(name);
        }
        removable
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn pending_settings(&self, name: &str) -> Option<Settings> {
        self.entries.get(name).map(|e| e.pending_settings.clone())
    }

    pub fn version(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|e| e.version.as_str())
    }

    /// The innermost live scope: the schedule child if any, otherwise root.
    pub fn context(&self, name: &str) -> Option<CancellationToken> {
        let entry = self.entries.get(name)?;
        Some(
            entry
                .children
                .get(&EventKind::Schedule)
                .unwrap_or(&entry.root)
                .clone(),
        )
    }

    pub fn set_loaded(&mut self, name: &str, package: Arc<P>) {
        if self.entries.contains_key(name) {
            self.loaded.insert(name.to_string(), package);
        }
    }

    pub fn loaded(&self, name: &str) -> Option<Arc<P>> {
        self.loaded.get(name).cloned()
    }

    pub fn loaded_packages(&self) -> impl Iterator<Item = (&String, &Arc<P>)> {
        self.loaded.iter()
    }

    pub fn snapshot(&self) -> BTreeMap<String, EntrySnapshot> {
        self.entries
            .iter()
            .map(|(name, e)| {
                (
                    name.clone(),
                    EntrySnapshot {
                        version: e.version.clone(),
                        settings_checksum: e.settings_checksum.clone(),
                        loaded: self.loaded.contains_key(name),
                    },
                )
            })
            .collect()
    }
}
