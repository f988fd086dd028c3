//! Cross-realm interest reference counter, persisted through the cache.

// std
use std::{collections::HashMap, sync::Mutex};
// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::{
	_prelude::*,
	business::Business,
	cache::{Cache, keys, persistent::PersistentCache},
};

/// Reference record for one business identity.
///
/// The version resolves races between realms: on each mutation the
/// in-memory and persisted copies are compared and the higher version wins.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRecord {
	/// Count of distinct watchers across all realms.
	pub reference: u32,
	/// Merge counter, incremented on every mutation.
	pub version: u32,
}

/// Per-process registry tracking how many watchers a business has across
/// all realms sharing the cache backing.
///
/// The merge is best-effort last-writer-wins by version: a truly concurrent
/// multi-realm burst may over- or under-count by one. A zero count always
/// deletes the record, so a subscription never stays active forever.
pub struct InterestRegistry {
	cache: Arc<PersistentCache>,
	memory: Mutex<HashMap<String, ReferenceRecord>>,
}
impl InterestRegistry {
	/// Build a registry over the shared persistent cache.
	pub fn new(cache: Arc<PersistentCache>) -> Self {
		Self { cache, memory: Mutex::new(HashMap::new()) }
	}

	/// Register one more watcher; returns the merged reference count.
	pub async fn collect(&self, business: &Business) -> u32 {
		self.mutate(business, 1).await
	}

	/// Drop one watcher; returns the merged reference count.
	pub async fn release(&self, business: &Business) -> u32 {
		self.mutate(business, -1).await
	}

	/// Current reference count for a business.
	pub async fn get_reference(&self, business: &Business) -> u32 {
		let key = record_key(business);
		let memory =
			self.memory.lock().expect("registry lock poisoned").get(&key).copied().unwrap_or_default();
		let persisted = self.read_persisted(&key, memory).await;

		if memory.version > persisted.version { memory.reference } else { persisted.reference }
	}

	async fn mutate(&self, business: &Business, delta: i64) -> u32 {
		let key = record_key(business);
		let memory =
			self.memory.lock().expect("registry lock poisoned").get(&key).copied().unwrap_or_default();
		let persisted = self.read_persisted(&key, memory).await;
		let mut record = if memory.version > persisted.version { memory } else { persisted };

		record.reference = (record.reference as i64 + delta).max(0) as u32;
		record.version += 1;

		if record.reference == 0 {
			self.cache.remove_item(&key);
			self.memory.lock().expect("registry lock poisoned").remove(&key);
		} else {
			match serde_json::to_value(record) {
				Ok(value) => self.cache.set_item(&key, value, None),
				Err(err) => tracing::warn!(%key, error = %err, "reference record not serializable"),
			}

			self.memory.lock().expect("registry lock poisoned").insert(key.clone(), record);
		}

		if let Err(err) = self.cache.flush().await {
			tracing::warn!(%key, error = %err, "reference write-through failed, keeping in-memory count");
		}

		tracing::debug!(%key, reference = record.reference, version = record.version, "interest mutated");

		record.reference
	}

	// Cache errors never propagate; the in-memory copy keeps counting.
	async fn read_persisted(&self, key: &str, fallback: ReferenceRecord) -> ReferenceRecord {
		match self.cache.read_through(key).await {
			Ok(Some(value)) => serde_json::from_value(value).unwrap_or_default(),
			Ok(None) => ReferenceRecord::default(),
			Err(err) => {
				tracing::warn!(%key, error = %err, "reference read-through failed, using in-memory copy");

				fallback
			},
		}
	}
}

fn record_key(business: &Business) -> String {
	format!("{}{}", keys::WATCHED_BIZ_PREFIX, business.identity())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::cache::storage::MemoryStorage;

	async fn registry_pair() -> (InterestRegistry, InterestRegistry) {
		let storage = Arc::new(MemoryStorage::new());
		let a = InterestRegistry::new(Arc::new(
			PersistentCache::load(storage.clone()).await.expect("load"),
		));
		let b =
			InterestRegistry::new(Arc::new(PersistentCache::load(storage).await.expect("load")));

		(a, b)
	}

	#[tokio::test]
	async fn collect_and_release_balance_to_zero() {
		let (registry, _) = registry_pair().await;
		let business = Business::new("log/detail", "B1");

		assert_eq!(registry.collect(&business).await, 1);
		assert_eq!(registry.collect(&business).await, 2);
		assert_eq!(registry.release(&business).await, 1);
		assert_eq!(registry.release(&business).await, 0);
		assert_eq!(registry.get_reference(&business).await, 0);
	}

	#[tokio::test]
	async fn release_is_floored_at_zero() {
		let (registry, _) = registry_pair().await;
		let business = Business::new("log/detail", "B1");

		assert_eq!(registry.release(&business).await, 0);
		assert_eq!(registry.get_reference(&business).await, 0);
	}

	#[tokio::test]
	async fn counts_cross_realms_through_the_backing() {
		let (ours, theirs) = registry_pair().await;
		let business = Business::new("log/detail", "B1");

		assert_eq!(ours.collect(&business).await, 1);
		assert_eq!(theirs.collect(&business).await, 2);
		assert_eq!(ours.release(&business).await, 1);
		assert_eq!(theirs.release(&business).await, 0);
		assert_eq!(ours.get_reference(&business).await, 0);
	}

	#[tokio::test]
	async fn record_is_deleted_once_every_collect_is_released() {
		let (registry, _) = registry_pair().await;
		let business = Business::new("layout_device/status", 9);

		registry.collect(&business).await;
		registry.release(&business).await;

		let key = record_key(&business);

		assert!(registry.cache.read_through(&key).await.expect("read").is_none());
	}

	#[tokio::test]
	async fn distinct_identities_do_not_share_counts() {
		let (registry, _) = registry_pair().await;
		let one = Business::new("log/detail", "B1");
		let other = Business::new("log/detail", "B2");

		assert_eq!(registry.collect(&one).await, 1);
		assert_eq!(registry.collect(&other).await, 1);
		assert_eq!(registry.release(&one).await, 0);
		assert_eq!(registry.get_reference(&other).await, 1);
	}
}
