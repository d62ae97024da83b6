//! Layered package values.
//!
//! The effective values are `static ⊕ settings ⊕ patches`, each layer merged
//! over the previous one with JSON merge patch semantics (RFC 7386). Hook
//! patches are composed into a single patch layer so deletions survive
//! later settings changes.

use pkgmgr_types::Settings;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Default)]
pub struct Values {
    static_layer: Value,
    settings: Value,
    patches: Value,
}

impl Values {
    pub fn new(static_layer: Value) -> Self {
        Self {
            static_layer,
            settings: Value::Null,
            patches: Value::Null,
        }
    }

    pub fn set_settings(&mut self, settings: &Settings) {
        self.settings = Value::Object(settings.clone());
    }

    pub fn settings(&self) -> Settings {
        match &self.settings {
            Value::Object(map) => map.clone(),
            _ => Settings::new(),
        }
    }

    /// Fold a hook's merge patch into the patch layer.
    pub fn apply_patch(&mut self, patch: &Value) {
        compose_patch(&mut self.patches, patch);
    }

    pub fn merged(&self) -> Value {
        let mut out = match &self.static_layer {
            Value::Object(_) => self.static_layer.clone(),
            _ => Value::Object(Map::new()),
        };
        if !self.settings.is_null() {
            merge_patch(&mut out, &self.settings);
        }
        if !self.patches.is_null() {
            merge_patch(&mut out, &self.patches);
        }
        out
    }

    /// sha256 over the canonical JSON encoding of the merged values.
    pub fn checksum(&self) -> String {
        let bytes = serde_json::to_vec(&self.merged()).unwrap_or_default();
        hex::encode(Sha256::digest(bytes))
    }
}

/// Apply `patch` to `target` in place (RFC 7386).
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        for (key, value) in patch {
            if value.is_null() {
                map.remove(key);
            } else {
                merge_patch(map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Combine two merge patches so that applying the result equals applying
/// `base` then `next`. Null members are kept as deletion markers.
fn compose_patch(base: &mut Value, next: &Value) {
    let Value::Object(next) = next else {
        *base = next.clone();
        return;
    };
    if !base.is_object() {
        *base = Value::Object(Map::new());
    }
    if let Value::Object(map) = base {
        for (key, value) in next {
            let existing = map.get(key).map(Value::is_object);
            match existing {
                Some(true) if value.is_object() => {
                    if let Some(slot) = map.get_mut(key) {
                        compose_patch(slot, value);
                    }
                }
                Some(false) if value.is_object() => {
                    // The base layer replaced this key with a scalar, so the
                    // object starts empty and its nulls have nothing to delete.
                    let mut fresh = Value::Object(Map::new());
                    merge_patch(&mut fresh, value);
                    map.insert(key.clone(), fresh);
                }
                _ => {
                    map.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn merge_patch_follows_rfc7386() {
        let mut doc = json!({"a": "b", "c": {"d": "e", "f": "g"}});
        merge_patch(&mut doc, &json!({"a": "z", "c": {"f": null}}));
        assert_eq!(doc, json!({"a": "z", "c": {"d": "e"}}));

        let mut doc = json!({"a": [1, 2]});
        merge_patch(&mut doc, &json!({"a": [3]}));
        assert_eq!(doc, json!({"a": [3]}));
    }

    #[test]
    fn layers_merge_in_order() {
        let mut values = Values::new(json!({"replicas": 1, "image": {"tag": "v1"}}));
        values.set_settings(json!({"replicas": 3}).as_object().unwrap());
        values.apply_patch(&json!({"image": {"tag": "v2"}}));
        assert_eq!(
            values.merged(),
            json!({"replicas": 3, "image": {"tag": "v2"}})
        );
    }

    #[test]
    fn patch_deletions_survive_settings_changes() {
        let mut values = Values::new(json!({"debug": true, "replicas": 1}));
        values.apply_patch(&json!({"debug": null}));
        values.set_settings(json!({"replicas": 2}).as_object().unwrap());
        assert_eq!(values.merged(), json!({"replicas": 2}));
    }

    #[test]
    fn checksum_tracks_content() {
        let mut values = Values::new(json!({"a": 1}));
        let before = values.checksum();
        values.apply_patch(&json!({"a": 1}));
        assert_eq!(before, values.checksum());
        values.apply_patch(&json!({"a": 2}));
        assert_ne!(before, values.checksum());
    }
}
