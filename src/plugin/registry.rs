use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::persistence::VirtualizationConnector;

/// Marker for a kind of vendor API. `Handle` is the trait object handed
/// to tasks.
pub trait Capability: 'static {
    type Handle: ?Sized + Send + 'static;

    const NAME: &'static str;
}

/// Builds an API handle for one connector.
pub type Factory<C> = Arc<
    dyn Fn(&VirtualizationConnector) -> Result<Box<<C as Capability>::Handle>> + Send + Sync,
>;

/// Capability-typed registry of vendor plugin factories.
///
/// Factories are keyed by capability and vendor name. Registration may
/// happen at any time; lookups take a read lock only long enough to clone
/// the factory.
#[derive(Default)]
pub struct PluginRegistry {
    factories: RwLock<HashMap<(TypeId, String), Box<dyn Any + Send + Sync>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<C: Capability>(&self, vendor: &str, factory: Factory<C>) {
        info!(capability = C::NAME, vendor, "Registered plugin");
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((TypeId::of::<C>(), vendor.to_string()), Box::new(factory));
    }

    /// Register a closure as the factory for `vendor`.
    pub fn register_fn<C, F>(&self, vendor: &str, factory: F)
    where
        C: Capability,
        F: Fn(&VirtualizationConnector) -> Result<Box<C::Handle>> + Send + Sync + 'static,
    {
        self.register::<C>(vendor, Arc::new(factory));
    }

    pub fn unregister<C: Capability>(&self, vendor: &str) -> bool {
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(TypeId::of::<C>(), vendor.to_string()))
            .is_some()
    }

    pub fn is_registered<C: Capability>(&self, vendor: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&(TypeId::of::<C>(), vendor.to_string()))
    }

    /// Build the `C` handle for a connector, picking the plugin by the
    /// connector's virtualization type.
    ///
    /// # Errors
    /// Returns [`Error::ServiceUnavailable`] if no plugin is registered, or
    /// whatever the factory reports.
    pub fn resolve<C: Capability>(
        &self,
        connector: &VirtualizationConnector,
    ) -> Result<Box<C::Handle>> {
        let vendor = connector.virtualization_type.vendor();
        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(TypeId::of::<C>(), vendor.to_string()))
            .and_then(|f| f.downcast_ref::<Factory<C>>())
            .cloned()
            .ok_or_else(|| Error::ServiceUnavailable {
                capability: C::NAME.to_string(),
                vendor: vendor.to_string(),
            })?;

        debug!(capability = C::NAME, vendor, connector = %connector.name, "Resolving plugin");
        factory(connector)
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .factories
            .read()
            .map(|factories| factories.len())
            .unwrap_or_default();
        f.debug_struct("PluginRegistry")
            .field("factories", &count)
            .finish()
    }
}
