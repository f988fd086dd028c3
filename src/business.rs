//! Business (follow) identity.

// std
use std::fmt::{Display, Formatter, Result as FmtResult};
// crates.io
use serde::{Deserialize, Serialize};

/// Server-side routing selector inside a subject.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Bid {
	/// Opaque textual selector.
	Text(String),
	/// Numeric selector.
	Number(i64),
}
impl Display for Bid {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match self {
			Self::Text(text) => f.write_str(text),
			Self::Number(number) => write!(f, "{number}"),
		}
	}
}
impl From<&str> for Bid {
	fn from(value: &str) -> Self {
		Self::Text(value.into())
	}
}
impl From<i64> for Bid {
	fn from(value: i64) -> Self {
		Self::Number(value)
	}
}

/// A `(subject, bid)` pair a component wants server-pushed updates for.
///
/// A missing bid denotes a subject the client receives without asking the
/// server to explicitly route it; no interest notification is issued for it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Business {
	/// Broker-topic suffix after the client-id prefix, e.g. `layout_device/status`.
	pub subject: String,
	/// Optional routing selector.
	#[serde(default)]
	pub bid: Option<Bid>,
}
impl Business {
	/// Construct a follow with a bid.
	pub fn new(subject: impl Into<String>, bid: impl Into<Bid>) -> Self {
		Self { subject: subject.into(), bid: Some(bid.into()) }
	}

	/// Construct a follow without a bid.
	pub fn subject_only(subject: impl Into<String>) -> Self {
		Self { subject: subject.into(), bid: None }
	}

	/// Stable identity string, `"{subject}|{bid or empty}"`.
	///
	/// Two businesses with equal identity are interchangeable.
	pub fn identity(&self) -> String {
		match &self.bid {
			Some(bid) => format!("{}|{bid}", self.subject),
			None => format!("{}|", self.subject),
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn identity_includes_bid_when_present() {
		assert_eq!(Business::new("log/detail", "B1").identity(), "log/detail|B1");
		assert_eq!(Business::new("log/detail", 42).identity(), "log/detail|42");
	}

	#[test]
	fn identity_keeps_trailing_separator_without_bid() {
		assert_eq!(Business::subject_only("layout_device/status").identity(), "layout_device/status|");
	}

	#[test]
	fn equal_identities_are_interchangeable() {
		let a = Business::new("log/detail", "B1");
		let b = Business::new("log/detail", Bid::Text("B1".into()));

		assert_eq!(a.identity(), b.identity());
		assert_eq!(a, b);
	}
}
