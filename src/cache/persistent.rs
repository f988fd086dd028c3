//! Persistent cache variant: namespaced keys over a byte-level backing.

// std
use std::{
	collections::{HashMap, HashSet},
	sync::Mutex,
};
// crates.io
use serde::{Deserialize, Serialize};
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	cache::{Cache, NAMESPACE, descriptor::ItemDescriptor, storage::Storage},
};

/// Value shape written through to the backing store.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct PersistedItem {
	value: Value,
	created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
	items: HashMap<String, PersistedItem>,
	descriptors: HashMap<String, ItemDescriptor>,
	dirty: HashSet<String>,
	removed: HashSet<String>,
}

/// Cache that namespaces every key with [`NAMESPACE`] and persists writes
/// through a [`Storage`] backing.
///
/// Writes land in memory immediately and mark the key dirty; [`flush`]
/// writes only dirtied and removed keys through. [`read_through`] bypasses
/// memory so a realm can observe writes made by its siblings.
///
/// [`flush`]: Self::flush
/// [`read_through`]: Self::read_through
pub struct PersistentCache {
	storage: Arc<dyn Storage>,
	state: Mutex<State>,
}
impl PersistentCache {
	/// Restore a cache from the backing store, scanning the namespace.
	pub async fn load(storage: Arc<dyn Storage>) -> Result<Self> {
		let mut items = HashMap::new();

		for (key, bytes) in storage.scan(NAMESPACE).await? {
			let key = key[NAMESPACE.len()..].to_string();

			match serde_json::from_slice::<PersistedItem>(&bytes) {
				Ok(item) => {
					items.insert(key, item);
				},
				Err(err) => {
					tracing::warn!(%key, error = %err, "discarding undecodable cache item");
				},
			}
		}

		tracing::debug!(restored = items.len(), "persistent cache restored");

		Ok(Self {
			storage,
			state: Mutex::new(State { items, ..Default::default() }),
		})
	}

	/// Write dirty keys through and drop removed keys from the backing.
	pub async fn flush(&self) -> Result<()> {
		let (writes, removals) = {
			let state = self.state.lock().expect("cache lock poisoned");
			let writes = state
				.dirty
				.iter()
				.filter_map(|key| {
					state.items.get(key).map(|item| {
						(format!("{NAMESPACE}{key}"), serde_json::to_vec(item), key.clone())
					})
				})
				.collect::<Vec<_>>();
			let removals = state
				.removed
				.iter()
				.map(|key| (format!("{NAMESPACE}{key}"), key.clone()))
				.collect::<Vec<_>>();

			(writes, removals)
		};

		for (namespaced, bytes, key) in writes {
			self.storage.write(&namespaced, &bytes?).await?;
			self.state.lock().expect("cache lock poisoned").dirty.remove(&key);
		}
		for (namespaced, key) in removals {
			self.storage.remove(&namespaced).await?;
			self.state.lock().expect("cache lock poisoned").removed.remove(&key);
		}

		Ok(())
	}

	/// Read one key straight from the backing store, refreshing the
	/// in-memory copy on success.
	pub async fn read_through(&self, key: &str) -> Result<Option<Value>> {
		let bytes = self.storage.read(&format!("{NAMESPACE}{key}")).await?;
		let Some(bytes) = bytes else {
			return Ok(None);
		};
		let item = serde_json::from_slice::<PersistedItem>(&bytes)?;
		let value = item.value.clone();

		{
			let mut state = self.state.lock().expect("cache lock poisoned");

			state.items.insert(key.into(), item);
			state.removed.remove(key);
		}

		Ok(Some(value))
	}

	/// Convenience string accessor for the well-known keys.
	pub fn get_str(&self, key: &str) -> Option<String> {
		self.get_item(key).and_then(|value| value.as_str().map(|s| s.to_string()))
	}

	fn descriptor_of(state: &State, key: &str) -> ItemDescriptor {
		state.descriptors.get(key).copied().unwrap_or_default()
	}
}
impl Cache for PersistentCache {
	fn size(&self) -> usize {
		self.state.lock().expect("cache lock poisoned").items.len()
	}

	fn get_item(&self, key: &str) -> Option<Value> {
		self.state.lock().expect("cache lock poisoned").items.get(key).map(|item| item.value.clone())
	}

	fn set_item(&self, key: &str, value: Value, descriptor: Option<ItemDescriptor>) {
		let mut state = self.state.lock().expect("cache lock poisoned");

		if !Self::descriptor_of(&state, key).writable {
			return;
		}

		if let Some(descriptor) = descriptor {
			match state.descriptors.get(key) {
				Some(existing) if !existing.configurable => {},
				_ => {
					state.descriptors.insert(key.into(), descriptor);
				},
			}
		}

		state.items.insert(key.into(), PersistedItem { value, created_at: Utc::now() });
		state.dirty.insert(key.into());
		state.removed.remove(key);
	}

	fn remove_item(&self, key: &str) {
		let mut state = self.state.lock().expect("cache lock poisoned");

		if !Self::descriptor_of(&state, key).deletable {
			return;
		}

		if state.items.remove(key).is_some() {
			state.dirty.remove(key);
			state.removed.insert(key.into());
		}
	}

	fn clear(&self) {
		let mut state = self.state.lock().expect("cache lock poisoned");
		let deletable = state
			.items
			.keys()
			.filter(|key| Self::descriptor_of(&state, key.as_str()).deletable)
			.cloned()
			.collect::<Vec<_>>();

		for key in deletable {
			state.items.remove(&key);
			state.dirty.remove(&key);
			state.removed.insert(key);
		}
	}

	fn define_item(&self, key: &str, descriptor: ItemDescriptor) {
		let mut state = self.state.lock().expect("cache lock poisoned");

		match state.descriptors.get(key) {
			Some(existing) if !existing.configurable => {},
			_ => {
				state.descriptors.insert(key.into(), descriptor);
			},
		}
	}
}
