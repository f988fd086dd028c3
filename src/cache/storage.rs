//! Byte-level persistence contract backing the persistent cache.

// std
use std::{collections::HashMap, sync::Mutex};
// crates.io
use async_trait::async_trait;
// self
use crate::_prelude::*;

/// Byte-level backing store.
///
/// The persistent cache and the interest registry only depend on this
/// contract; the host decides what actually holds the bytes.
#[async_trait]
pub trait Storage: Send + Sync {
	/// Enumerate every `(key, value)` pair whose key starts with `prefix`.
	async fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

	/// Read a single key.
	async fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

	/// Write a single key through.
	async fn write(&self, key: &str, value: &[u8]) -> Result<()>;

	/// Remove a single key.
	async fn remove(&self, key: &str) -> Result<()>;
}

/// In-process [`Storage`], shareable across realms via `Arc`.
#[derive(Debug, Default)]
pub struct MemoryStorage {
	entries: Mutex<HashMap<String, Vec<u8>>>,
}
impl MemoryStorage {
	/// Create an empty store.
	pub fn new() -> Self {
		Self::default()
	}
}
#[async_trait]
impl Storage for MemoryStorage {
	async fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
		let entries = self.entries.lock().expect("storage lock poisoned");

		Ok(entries
			.iter()
			.filter(|(key, _)| key.starts_with(prefix))
			.map(|(key, value)| (key.clone(), value.clone()))
			.collect())
	}

	async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
		let entries = self.entries.lock().expect("storage lock poisoned");

		Ok(entries.get(key).cloned())
	}

	async fn write(&self, key: &str, value: &[u8]) -> Result<()> {
		let mut entries = self.entries.lock().expect("storage lock poisoned");

		entries.insert(key.into(), value.into());

		Ok(())
	}

	async fn remove(&self, key: &str) -> Result<()> {
		let mut entries = self.entries.lock().expect("storage lock poisoned");

		entries.remove(key);

		Ok(())
	}
}
