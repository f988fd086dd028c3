//! Per-key write/delete policy.

// crates.io
use serde::{Deserialize, Serialize};

/// Policy attached to a cache key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDescriptor {
	/// Whether the descriptor itself may later be replaced.
	pub configurable: bool,
	/// Whether `remove_item`/`clear` may drop the key.
	pub deletable: bool,
	/// Whether `set_item` may overwrite the value.
	pub writable: bool,
}
impl ItemDescriptor {
	/// A frozen, read-only, non-deletable descriptor.
	pub fn locked() -> Self {
		Self { configurable: false, deletable: false, writable: false }
	}
}
impl Default for ItemDescriptor {
	fn default() -> Self {
		Self { configurable: false, deletable: true, writable: true }
	}
}
