//! Remembers the digest of the last desired state this process pushed for every managed object.
//!
//! The store only knows what this process applied. An out-of-band edit of a live object is not
//! noticed while the stored digest still matches; a restart (empty store) or
//! [`ChangeDetection::Always`] forces a re-apply.

use std::fmt;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use stackable_operator::kube::ResourceExt;
use strum::Display;

use crate::kube_api::NamespacedObject;

/// Identity of a managed object: the cache key and the API lookup key.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ObjectIdentity {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectIdentity {
    pub fn named<K: NamespacedObject>(namespace: &str, name: &str) -> Self {
        Self {
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn of<K: NamespacedObject>(obj: &K) -> Self {
        Self {
            kind: K::kind(&()).to_string(),
            namespace: obj.namespace().unwrap_or_default(),
            name: obj.name_any(),
        }
    }
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

#[derive(Clone, Copy, Debug, Default, Display, Eq, PartialEq, clap::ValueEnum)]
#[strum(serialize_all = "lowercase")]
pub enum ChangeDetection {
    /// Skip the update when the desired digest matches the last applied one.
    #[default]
    Cached,
    /// Update on every pass, correcting out-of-band edits at the cost of API traffic.
    Always,
}

/// Content digest of an object's serialized form.
///
/// Object keys are sorted before hashing, so the digest does not depend on map insertion order.
pub fn digest<T: Serialize>(obj: &T) -> Result<String, serde_json::Error> {
    let canonical = serde_json::to_vec(&sort_keys(serde_json::to_value(obj)?))?;
    Ok(hex::encode(Sha256::digest(canonical)))
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries = map.into_iter().collect::<Vec<_>>();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, sort_keys(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

#[derive(Debug, Default)]
pub struct HashStore {
    mode: ChangeDetection,
    digests: DashMap<ObjectIdentity, String>,
}

impl HashStore {
    pub fn new(mode: ChangeDetection) -> Self {
        Self {
            mode,
            digests: DashMap::new(),
        }
    }

    /// Whether `desired` differs from what was last applied for `identity`, whatever the mode.
    pub fn has_changed(&self, identity: &ObjectIdentity, desired: &str) -> bool {
        self.digests
            .get(identity)
            .map_or(true, |applied| applied.value() != desired)
    }

    /// Whether `desired` must be written for `identity`.
    pub fn should_apply(&self, identity: &ObjectIdentity, desired: &str) -> bool {
        self.mode == ChangeDetection::Always || self.has_changed(identity, desired)
    }

    /// Must be called after every successful create or update.
    pub fn record(&self, identity: ObjectIdentity, digest: String) {
        self.digests.insert(identity, digest);
    }

    pub fn get(&self, identity: &ObjectIdentity) -> Option<String> {
        self.digests.get(identity).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::{BTreeMap, HashMap},
        sync::Arc,
    };

    use stackable_operator::k8s_openapi::{
        api::core::v1::ConfigMap, apimachinery::pkg::apis::meta::v1::ObjectMeta,
    };

    use super::*;

    fn identity(name: &str) -> ObjectIdentity {
        ObjectIdentity {
            kind: "ConfigMap".to_string(),
            namespace: "default".to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn unknown_identity_must_be_applied() {
        let store = HashStore::default();
        assert!(store.should_apply(&identity("hbase-config"), "abc"));
    }

    #[test]
    fn recorded_digest_suppresses_apply_until_it_changes() {
        let store = HashStore::default();
        store.record(identity("hbase-config"), "abc".to_string());

        assert!(!store.should_apply(&identity("hbase-config"), "abc"));
        assert!(store.should_apply(&identity("hbase-config"), "def"));
        assert!(store.should_apply(&identity("hadoop-config"), "abc"));

        store.record(identity("hbase-config"), "def".to_string());
        assert!(!store.should_apply(&identity("hbase-config"), "def"));
        assert_eq!(1, store.len());
    }

    #[test]
    fn always_mode_ignores_recorded_digests() {
        let store = HashStore::new(ChangeDetection::Always);
        store.record(identity("hbase-config"), "abc".to_string());
        assert!(store.should_apply(&identity("hbase-config"), "abc"));
        assert!(!store.has_changed(&identity("hbase-config"), "abc"));
        assert!(store.has_changed(&identity("hbase-config"), "def"));
    }

    #[test]
    fn identity_includes_namespace() {
        let store = HashStore::default();
        store.record(identity("hbase-config"), "abc".to_string());
        let other_namespace = ObjectIdentity {
            namespace: "tenant-a".to_string(),
            ..identity("hbase-config")
        };
        assert!(store.should_apply(&other_namespace, "abc"));
    }

    #[test]
    fn identity_of_object() {
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some("hbase-config".to_string()),
                namespace: Some("default".to_string()),
                ..ObjectMeta::default()
            },
            ..ConfigMap::default()
        };
        let identity = ObjectIdentity::of(&config_map);
        assert_eq!("ConfigMap/default/hbase-config", identity.to_string());
    }

    #[test]
    fn digest_is_independent_of_map_order() {
        let mut first = HashMap::new();
        first.insert("hbase-site.xml", "a");
        first.insert("core-site.xml", "b");
        first.insert("hdfs-site.xml", "c");
        let second = BTreeMap::from([
            ("hdfs-site.xml", "c"),
            ("core-site.xml", "b"),
            ("hbase-site.xml", "a"),
        ]);

        assert_eq!(digest(&first).unwrap(), digest(&second).unwrap());
        assert_ne!(
            digest(&first).unwrap(),
            digest(&BTreeMap::from([("hbase-site.xml", "b")])).unwrap()
        );
    }

    #[test]
    fn concurrent_records_do_not_race() {
        let store = Arc::new(HashStore::default());
        let handles = (0..8)
            .map(|worker| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        store.record(identity(&format!("cm-{worker}-{i}")), i.to_string());
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(800, store.len());
    }
}
