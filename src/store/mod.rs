//! Object store module.
//!
//! Thread-safe, versioned, in-process model of the cluster's object store.
//! Every write is guarded by optimistic concurrency, every change is published
//! to watchers, and deleting an object garbage-collects its dependents.

mod error;

pub use error::*;

use crate::resources::{ObjectKey, OwnerReference, Resource};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

/// Capacity of the watch channel; slow watchers observe `Lagged` and resync.
const WATCH_CHANNEL_CAPACITY: usize = 1024;

/// Kind of change published to watchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

/// A change to one object in the store.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub event_type: WatchEventType,
    pub key: ObjectKey,
    /// True when the write changed the object's spec (generation bumped)
    pub spec_changed: bool,
    /// Controller owner of the changed object, if any
    pub owner: Option<OwnerReference>,
}

struct StoredObject {
    value: serde_json::Value,
    uid: String,
    resource_version: u64,
    owner_uids: Vec<String>,
    controller_owner: Option<OwnerReference>,
}

/// The cluster object store.
///
/// Objects are stored as JSON documents keyed by kind, namespace and name.
/// Uses lock-free concurrent maps (DashMap) so many reconciles can read and
/// write distinct objects in parallel.
///
/// # Examples
///
/// ```
/// use vmimport::resources::{ObjectMeta, Secret};
/// use vmimport::store::ObjectStore;
/// use std::collections::BTreeMap;
///
/// let store = ObjectStore::new();
/// let secret = Secret {
///     metadata: ObjectMeta::new("default", "creds"),
///     string_data: BTreeMap::new(),
/// };
///
/// let created = store.create(&secret).unwrap();
/// assert_eq!(created.metadata.generation, 1);
/// assert!(store.get::<Secret>("default", "creds").unwrap().is_some());
/// ```
pub struct ObjectStore {
    objects: DashMap<ObjectKey, StoredObject>,
    version: AtomicU64,
    events: broadcast::Sender<WatchEvent>,
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            objects: DashMap::new(),
            version: AtomicU64::new(0),
            events,
        }
    }

    /// Subscribe to change events.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    /// Number of stored objects across all kinds.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Fetch an object by namespace and name.
    pub fn get<R: Resource>(&self, namespace: &str, name: &str) -> Result<Option<R>, StoreError> {
        let key = ObjectKey::of::<R>(namespace, name);
        match self.objects.get(&key) {
            Some(entry) => decode::<R>(&entry.value).map(Some),
            None => Ok(None),
        }
    }

    /// Fetch an object that must exist.
    pub fn get_required<R: Resource>(&self, namespace: &str, name: &str) -> Result<R, StoreError> {
        self.get(namespace, name)?
            .ok_or_else(|| StoreError::NotFound(ObjectKey::of::<R>(namespace, name)))
    }

    /// Whether an object exists, without decoding it.
    pub fn contains<R: Resource>(&self, namespace: &str, name: &str) -> bool {
        self.objects
            .contains_key(&ObjectKey::of::<R>(namespace, name))
    }

    /// List objects of one kind, optionally restricted to a namespace, ordered by key.
    pub fn list<R: Resource>(&self, namespace: Option<&str>) -> Result<Vec<R>, StoreError> {
        let mut keys: Vec<ObjectKey> = self
            .objects
            .iter()
            .filter(|entry| {
                let key = entry.key();
                key.kind == R::KIND && namespace.is_none_or(|ns| key.namespace == ns)
            })
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();

        let mut objects = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = self.objects.get(&key) {
                objects.push(decode::<R>(&entry.value)?);
            }
        }
        Ok(objects)
    }

    /// Create a new object.
    ///
    /// Assigns uid, resource version, generation and creation timestamp.
    ///
    /// # Errors
    ///
    /// - `StoreError::AlreadyExists` if an object with the same key exists
    /// - `StoreError::OwnerGone` if every owner the object references has
    ///   been deleted, including an owner deleted while the create ran
    pub fn create<R: Resource>(&self, object: &R) -> Result<R, StoreError> {
        let mut object = object.clone();
        let key = ObjectKey::for_object(&object);
        let owner_uids: Vec<String> = object
            .metadata()
            .owner_references
            .iter()
            .map(|r| r.uid.clone())
            .collect();
        if self.owners_gone(&owner_uids) {
            return Err(StoreError::OwnerGone(key));
        }

        let created = match self.objects.entry(key.clone()) {
            Entry::Occupied(_) => return Err(StoreError::AlreadyExists(key)),
            Entry::Vacant(vacant) => {
                let version = self.next_version();
                let meta = object.metadata_mut();
                if !R::NAMESPACED {
                    meta.namespace.clear();
                }
                meta.uid = uuid::Uuid::new_v4().to_string();
                meta.resource_version = version;
                meta.generation = 1;
                meta.creation_timestamp = Some(chrono::Utc::now());

                let stored = stored_object(&object)?;
                vacant.insert(stored);
                object
            }
        };

        tracing::trace!(key = %key, "Object created");
        self.publish(WatchEventType::Added, key.clone(), true, &created);

        // The owner's delete may have collected garbage before this insert landed
        if self.owners_gone(&owner_uids) {
            self.collect_garbage();
            return Err(StoreError::OwnerGone(key));
        }
        Ok(created)
    }

    /// Replace an existing object if the caller's resource version is current.
    ///
    /// The generation is bumped only when the spec differs from the stored one.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the object does not exist
    /// - `StoreError::Conflict` if the object was modified since it was read
    pub fn update<R: Resource>(&self, object: &R) -> Result<R, StoreError> {
        let mut object = object.clone();
        let key = ObjectKey::for_object(&object);

        let (updated, spec_changed) = {
            let mut entry = self
                .objects
                .get_mut(&key)
                .ok_or_else(|| StoreError::NotFound(key.clone()))?;

            let expected = object.metadata().resource_version;
            if expected != entry.resource_version {
                return Err(StoreError::Conflict {
                    key,
                    expected,
                    actual: entry.resource_version,
                });
            }

            let current = decode::<R>(&entry.value)?;
            let new_value = encode(&object)?;
            let spec_changed = new_value.get("spec") != entry.value.get("spec");

            let version = self.next_version();
            let meta = object.metadata_mut();
            let current_meta = current.metadata();
            meta.uid = current_meta.uid.clone();
            meta.creation_timestamp = current_meta.creation_timestamp;
            meta.resource_version = version;
            meta.generation = if spec_changed {
                current_meta.generation + 1
            } else {
                current_meta.generation
            };

            *entry = stored_object(&object)?;
            (object, spec_changed)
        };

        tracing::trace!(key = %key, spec_changed, "Object updated");
        self.publish(WatchEventType::Modified, key, spec_changed, &updated);
        Ok(updated)
    }

    /// Delete an object and garbage-collect everything it owned.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no object with the given key exists.
    pub fn delete<R: Resource>(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let key = ObjectKey::of::<R>(namespace, name);
        let (_, removed) = self
            .objects
            .remove(&key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        tracing::debug!(key = %key, "Object deleted");
        let _ = self.events.send(WatchEvent {
            event_type: WatchEventType::Deleted,
            key,
            spec_changed: false,
            owner: removed.controller_owner,
        });

        let collected = self.collect_garbage();
        if collected > 0 {
            tracing::debug!(collected, "Garbage collected dependent objects");
        }
        Ok(())
    }

    /// Remove every object whose owners have all been deleted.
    ///
    /// Runs to a fixed point so ownership chains are removed transitively.
    /// Returns the number of objects removed.
    pub fn collect_garbage(&self) -> usize {
        let mut collected = 0;
        loop {
            let live: HashSet<String> = self
                .objects
                .iter()
                .map(|entry| entry.uid.clone())
                .collect();

            let orphans: Vec<ObjectKey> = self
                .objects
                .iter()
                .filter(|entry| {
                    !entry.owner_uids.is_empty()
                        && entry.owner_uids.iter().all(|uid| !live.contains(uid))
                })
                .map(|entry| entry.key().clone())
                .collect();

            if orphans.is_empty() {
                return collected;
            }

            for key in orphans {
                if let Some((_, removed)) = self.objects.remove(&key) {
                    collected += 1;
                    let _ = self.events.send(WatchEvent {
                        event_type: WatchEventType::Deleted,
                        key,
                        spec_changed: false,
                        owner: removed.controller_owner,
                    });
                }
            }
        }
    }

    fn owners_gone(&self, owner_uids: &[String]) -> bool {
        !owner_uids.is_empty()
            && !self
                .objects
                .iter()
                .any(|entry| owner_uids.contains(&entry.uid))
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn publish<R: Resource>(
        &self,
        event_type: WatchEventType,
        key: ObjectKey,
        spec_changed: bool,
        object: &R,
    ) {
        // No receivers is not an error
        let _ = self.events.send(WatchEvent {
            event_type,
            key,
            spec_changed,
            owner: object.metadata().controller_owner().cloned(),
        });
    }
}

fn encode<R: Resource>(object: &R) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(object).map_err(|source| StoreError::Serialization {
        kind: R::KIND,
        source,
    })
}

fn decode<R: Resource>(value: &serde_json::Value) -> Result<R, StoreError> {
    R::deserialize(value).map_err(|source| StoreError::Serialization {
        kind: R::KIND,
        source,
    })
}

fn stored_object<R: Resource>(object: &R) -> Result<StoredObject, StoreError> {
    let meta = object.metadata();
    Ok(StoredObject {
        value: encode(object)?,
        uid: meta.uid.clone(),
        resource_version: meta.resource_version,
        owner_uids: meta.owner_references.iter().map(|r| r.uid.clone()).collect(),
        controller_owner: meta.controller_owner().cloned(),
    })
}
