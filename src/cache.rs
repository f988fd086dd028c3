//! Namespaced key-value cache with per-key write/delete policy.

pub mod descriptor;
pub mod memory;
pub mod persistent;
pub mod storage;

// crates.io
use serde_json::Value;
// self
use crate::cache::descriptor::ItemDescriptor;

/// Namespace prepended to every persisted key.
pub const NAMESPACE: &str = "_LDS_";

/// Well-known cache keys shared with the session bootstrap.
pub mod keys {
	/// Bearer token of the authenticated session.
	pub const TOKEN: &str = "token";
	/// Password for the MQTT broker account.
	pub const MQTT_PASSWORD: &str = "mqttPassword";
	/// Per-user uuid handed out at sign-in.
	pub const MQTT_UUID: &str = "mqttUuid";
	/// Shared client id (hub mode only).
	pub const CLIENT_ID: &str = "clientId";
	/// Broker host.
	pub const MQTT_HOST: &str = "mqttHost";
	/// Broker URL scheme (`ws`, `wss`, ...).
	pub const MQTT_HOST_PROTOCOL: &str = "mqttHostProtocol";
	/// Prefix for per-business interest reference records.
	pub const WATCHED_BIZ_PREFIX: &str = "mqttWatchedBiz_";
}

/// Contract shared by the cache variants.
pub trait Cache: Send + Sync {
	/// Number of items currently held.
	fn size(&self) -> usize;

	/// Fetch the value stored under `key`.
	fn get_item(&self, key: &str) -> Option<Value>;

	/// Store `value` under `key`, optionally installing a descriptor.
	///
	/// A write blocked by a non-writable descriptor silently no-ops.
	fn set_item(&self, key: &str, value: Value, descriptor: Option<ItemDescriptor>);

	/// Remove the item stored under `key`.
	///
	/// A removal blocked by a non-deletable descriptor silently no-ops.
	fn remove_item(&self, key: &str);

	/// Remove every deletable item.
	fn clear(&self);

	/// Install a descriptor for `key`.
	///
	/// A non-configurable descriptor already in place can never be replaced.
	fn define_item(&self, key: &str, descriptor: ItemDescriptor);
}
