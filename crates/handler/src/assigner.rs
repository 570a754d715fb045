use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{Handler, RESERVED_PREFIX, RegisterError};

/// Resolves method names to handlers.
pub trait Assigner: Send + Sync + 'static {
	/// Returns the handler bound to `method`, if any.
	fn assign(&self, method: &str) -> Option<Handler>;

	/// Returns the bound method names in sorted order.
	fn names(&self) -> Vec<String>;
}

impl<A: Assigner + ?Sized> Assigner for Arc<A> {
	fn assign(&self, method: &str) -> Option<Handler> {
		(**self).assign(method)
	}

	fn names(&self) -> Vec<String> {
		(**self).names()
	}
}

/// A fixed table from method names to handlers.
///
/// Names are validated as they are inserted: empty names, names with the
/// reserved `rpc.` prefix and duplicates are rejected.
#[derive(Debug, Clone, Default)]
pub struct Map {
	handlers: BTreeMap<String, Handler>,
}

impl Map {
	/// Creates an empty map.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Binds `handler` to `method`.
	pub fn insert(&mut self, method: impl Into<String>, handler: Handler) -> Result<(), RegisterError> {
		let method = method.into();
		if method.is_empty() {
			return Err(RegisterError::EmptyName);
		}
		if method.starts_with(RESERVED_PREFIX) {
			return Err(RegisterError::Reserved(method));
		}
		if self.handlers.contains_key(&method) {
			return Err(RegisterError::Duplicate(method));
		}
		self.handlers.insert(method, handler);
		Ok(())
	}

	/// Binds `handler` to `method`, consuming and returning the map.
	pub fn with(mut self, method: impl Into<String>, handler: Handler) -> Result<Self, RegisterError> {
		self.insert(method, handler)?;
		Ok(self)
	}

	/// Returns the number of bound methods.
	pub fn len(&self) -> usize {
		self.handlers.len()
	}

	/// Returns true if no methods are bound.
	pub fn is_empty(&self) -> bool {
		self.handlers.is_empty()
	}
}

impl Assigner for Map {
	fn assign(&self, method: &str) -> Option<Handler> {
		self.handlers.get(method).cloned()
	}

	fn names(&self) -> Vec<String> {
		self.handlers.keys().cloned().collect()
	}
}

/// Routes `Service.Method` names to per-service assigners.
#[derive(Clone, Default)]
pub struct ServiceMap {
	services: BTreeMap<String, Arc<dyn Assigner>>,
}

impl std::fmt::Debug for ServiceMap {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ServiceMap").field("services", &self.services.keys()).finish()
	}
}

impl ServiceMap {
	/// Creates an empty service map.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Binds `assigner` to the `service` prefix.
	pub fn insert(&mut self, service: impl Into<String>, assigner: impl Assigner) -> Result<(), RegisterError> {
		let service = service.into();
		if service.is_empty() || service.contains('.') {
			return Err(RegisterError::InvalidService(service));
		}
		if self.services.contains_key(&service) {
			return Err(RegisterError::Duplicate(service));
		}
		self.services.insert(service, Arc::new(assigner));
		Ok(())
	}

	/// Binds `assigner` to `service`, consuming and returning the map.
	pub fn with(mut self, service: impl Into<String>, assigner: impl Assigner) -> Result<Self, RegisterError> {
		self.insert(service, assigner)?;
		Ok(self)
	}
}

impl Assigner for ServiceMap {
	fn assign(&self, method: &str) -> Option<Handler> {
		let (service, method) = method.split_once('.')?;
		self.services.get(service)?.assign(method)
	}

	fn names(&self) -> Vec<String> {
		self.services
			.iter()
			.flat_map(|(service, assigner)| assigner.names().into_iter().map(move |name| format!("{service}.{name}")))
			.collect()
	}
}
