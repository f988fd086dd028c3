//! Scoped service locator used to wire singletons at the outermost boundary.
//!
//! The service and worker take their collaborators as constructor parameters;
//! the locator only backs host-binding code that needs late lookup.

// std
use std::{
	any::{Any, TypeId, type_name},
	collections::HashMap,
	sync::Mutex,
};

const DEFAULT_SCOPE: &str = "default";

type Factory = Box<dyn Fn() -> Box<dyn Any + Send + Sync> + Send + Sync>;
type OnPop = Box<dyn FnOnce() + Send>;

struct Scope {
	name: String,
	factories: HashMap<TypeId, Factory>,
	on_pop: Option<OnPop>,
}
impl Scope {
	fn new(name: impl Into<String>, on_pop: Option<OnPop>) -> Self {
		Self { name: name.into(), factories: HashMap::new(), on_pop }
	}
}

/// A stack of named scopes mapping type tokens to zero-argument factories.
///
/// Lookup walks the stack top-down; the first match wins.
pub struct ServiceLocator {
	scopes: Mutex<Vec<Scope>>,
}
impl ServiceLocator {
	/// Create a locator holding only the default scope.
	pub fn new() -> Self {
		Self { scopes: Mutex::new(vec![Scope::new(DEFAULT_SCOPE, None)]) }
	}

	/// Register a factory for `T` in the current (top) scope.
	///
	/// Registering a token that already resolves is an invariant violation;
	/// the assertion is skipped in release builds and the newer registration
	/// shadows the older one.
	pub fn register<T>(&self, factory: impl Fn() -> T + Send + Sync + 'static)
	where
		T: Any + Send + Sync,
	{
		let mut scopes = self.scopes.lock().expect("locator lock poisoned");

		debug_assert!(
			!scopes.iter().any(|scope| scope.factories.contains_key(&TypeId::of::<T>())),
			"type {} is already registered",
			type_name::<T>(),
		);

		let top = scopes.last_mut().expect("default scope always present");

		top.factories.insert(TypeId::of::<T>(), Box::new(move || Box::new(factory())));
	}

	/// Resolve `T` by walking the scope stack top-down.
	pub fn resolve<T>(&self) -> Option<T>
	where
		T: Any + Send + Sync,
	{
		let scopes = self.scopes.lock().expect("locator lock poisoned");

		scopes.iter().rev().find_map(|scope| {
			scope
				.factories
				.get(&TypeId::of::<T>())
				.and_then(|factory| factory().downcast::<T>().ok())
				.map(|value| *value)
		})
	}

	/// Remove the registration for `T` from every scope.
	pub fn unregister<T>(&self)
	where
		T: Any + Send + Sync,
	{
		let mut scopes = self.scopes.lock().expect("locator lock poisoned");

		for scope in scopes.iter_mut() {
			scope.factories.remove(&TypeId::of::<T>());
		}
	}

	/// Push a new scope; registrations land in it until it is popped.
	pub fn push_scope(&self, name: impl Into<String>, on_pop: Option<Box<dyn FnOnce() + Send>>) {
		let mut scopes = self.scopes.lock().expect("locator lock poisoned");

		scopes.push(Scope::new(name, on_pop));
	}

	/// Pop the top scope, running its `on_pop` callback.
	///
	/// The default scope cannot be popped; returns whether a scope was removed.
	pub fn pop_scope(&self) -> bool {
		let popped = {
			let mut scopes = self.scopes.lock().expect("locator lock poisoned");

			if scopes.len() <= 1 {
				return false;
			}

			scopes.pop()
		};

		if let Some(scope) = popped {
			tracing::debug!(scope = %scope.name, "locator scope popped");

			if let Some(on_pop) = scope.on_pop {
				on_pop();
			}

			true
		} else {
			false
		}
	}

	/// Name of the current (top) scope.
	pub fn current_scope(&self) -> String {
		let scopes = self.scopes.lock().expect("locator lock poisoned");

		scopes.last().expect("default scope always present").name.clone()
	}
}
impl Default for ServiceLocator {
	fn default() -> Self {
		Self::new()
	}
}
