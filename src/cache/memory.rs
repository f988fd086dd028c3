//! In-memory cache variant without descriptor logic.

// std
use std::{collections::HashMap, sync::Mutex};
// crates.io
use serde_json::Value;
// self
use crate::cache::{Cache, descriptor::ItemDescriptor};

/// A straight mapping; descriptors are ignored.
#[derive(Debug, Default)]
pub struct MemoryCache {
	items: Mutex<HashMap<String, Value>>,
}
impl MemoryCache {
	/// Create an empty cache.
	pub fn new() -> Self {
		Self::default()
	}
}
impl Cache for MemoryCache {
	fn size(&self) -> usize {
		self.items.lock().expect("cache lock poisoned").len()
	}

	fn get_item(&self, key: &str) -> Option<Value> {
		self.items.lock().expect("cache lock poisoned").get(key).cloned()
	}

	fn set_item(&self, key: &str, value: Value, _descriptor: Option<ItemDescriptor>) {
		self.items.lock().expect("cache lock poisoned").insert(key.into(), value);
	}

	fn remove_item(&self, key: &str) {
		self.items.lock().expect("cache lock poisoned").remove(key);
	}

	fn clear(&self) {
		self.items.lock().expect("cache lock poisoned").clear();
	}

	fn define_item(&self, _key: &str, _descriptor: ItemDescriptor) {}
}
