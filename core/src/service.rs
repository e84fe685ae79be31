//! Service model: lifecycle hooks, type-erased handles and factories.
//!
//! A service is any `Send + Sync` value registered in the host. It may opt into
//! the three lifecycle phases by returning a hook future from
//! [`Service::on_config`], [`Service::on_init`] or [`Service::on_run`]. A
//! service without a hook skips the corresponding in-flight phase.
//!
//! Dependencies are declared explicitly: a [`ServiceFactory`] names the
//! services it needs, and the registry hands them over as [`Dependencies`]
//! once they all exist.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use svchost_core::service::{factory, Dependencies, Service, ServiceConfig, HookFuture};
//!
//! struct Database;
//! impl Service for Database {}
//!
//! struct Api {
//!     db: Arc<Database>,
//! }
//!
//! impl Service for Api {
//!     fn on_config<'a>(&'a self, _config: &'a ServiceConfig) -> Option<HookFuture<'a>> {
//!         Some(Box::pin(async { Ok(()) }))
//!     }
//! }
//!
//! let api = factory(&["Database"], |deps: Dependencies| {
//!     Ok(Arc::new(Api { db: deps.get::<Database>("Database")? }))
//! });
//! ```

use crate::error::{HostError, Result};
use crate::reflect::Exposed;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

/// Host configuration handed to every `on_config` hook.
///
/// Each service deserializes the section it cares about.
pub type ServiceConfig = serde_json::Value;

/// Future returned by lifecycle hooks.
pub type HookFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Lifecycle phase of a registered service.
///
/// `Configuring`, `Initializing` and `Running` are entered only when the
/// service has the corresponding hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Constructed and registered
    Registered,
    /// `on_config` in flight
    Configuring,
    /// Configuration done
    Configured,
    /// `on_init` in flight
    Initializing,
    /// Initialization done
    Initialized,
    /// `on_run` started (and possibly finished)
    Running,
}

impl Phase {
    /// Configuration has completed.
    #[must_use]
    pub fn is_configured(self) -> bool {
        self >= Self::Configured
    }

    /// Initialization has completed.
    #[must_use]
    pub fn is_initialized(self) -> bool {
        self >= Self::Initialized
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Registered => "registered",
            Self::Configuring => "configuring",
            Self::Configured => "configured",
            Self::Initializing => "initializing",
            Self::Initialized => "initialized",
            Self::Running => "running",
        };
        f.write_str(name)
    }
}

/// A service hosted by the registry.
///
/// All hooks are optional. Hooks take `&self`; services keep mutable state
/// behind their own locks.
pub trait Service: Any + Send + Sync {
    /// Name the service is registered under.
    ///
    /// Defaults to the short name of the concrete type (`my_crate::Foo<T>` → `Foo`).
    fn service_name(&self) -> &'static str {
        short_type_name(std::any::type_name::<Self>())
    }

    /// Configuration hook. Called once, before `on_init`.
    fn on_config<'a>(&'a self, _config: &'a ServiceConfig) -> Option<HookFuture<'a>> {
        None
    }

    /// Initialization hook. Called once, after configuration.
    fn on_init(&self) -> Option<HookFuture<'_>> {
        None
    }

    /// Run hook. Called once, after initialization.
    fn on_run(&self) -> Option<HookFuture<'_>> {
        None
    }

    /// The object graph this service exposes over the protocol, if any.
    fn exposed(self: Arc<Self>) -> Option<Arc<dyn Exposed>> {
        None
    }
}

/// Strip module path and generic arguments from a type name.
///
/// # Examples
///
/// ```
/// # use svchost_core::service::short_type_name;
/// assert_eq!(short_type_name("my_crate::services::Counter"), "Counter");
/// assert_eq!(short_type_name("my_crate::Wrapper<my_crate::Inner>"), "Wrapper");
/// assert_eq!(short_type_name("Plain"), "Plain");
/// ```
#[must_use]
pub fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Type-erased handle to a registered service instance.
///
/// Keeps both the `dyn Service` view (for hooks and exposure) and a `dyn Any`
/// view (for typed lookups).
#[derive(Clone)]
pub struct ServiceHandle {
    service: Arc<dyn Service>,
    any: Arc<dyn Any + Send + Sync>,
    type_id: TypeId,
    type_name: &'static str,
}

impl ServiceHandle {
    /// Wrap a concrete service.
    #[must_use]
    pub fn new<S: Service>(service: Arc<S>) -> Self {
        let any: Arc<dyn Any + Send + Sync> = service.clone();
        Self {
            service,
            any,
            type_id: TypeId::of::<S>(),
            type_name: std::any::type_name::<S>(),
        }
    }

    /// The service as a trait object.
    #[must_use]
    pub const fn service(&self) -> &Arc<dyn Service> {
        &self.service
    }

    /// Registered name derived from the instance.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.service.service_name()
    }

    /// Identity of the concrete type.
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Full Rust type name of the concrete type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Typed view of the instance, if it is an `S`.
    #[must_use]
    pub fn downcast<S: Service>(&self) -> Option<Arc<S>> {
        Arc::clone(&self.any).downcast::<S>().ok()
    }

    /// Root of the exposed object graph, if the service exposes one.
    #[must_use]
    pub fn exposed(&self) -> Option<Arc<dyn Exposed>> {
        Arc::clone(&self.service).exposed()
    }

    /// Whether two handles point at the same instance.
    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.any, &other.any)
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("name", &self.name())
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Resolved dependencies, in manifest order.
#[derive(Debug, Clone, Default)]
pub struct Dependencies {
    resolved: Vec<(String, ServiceHandle)>,
}

impl Dependencies {
    /// Build from `(name, handle)` pairs in declaration order.
    #[must_use]
    pub const fn new(resolved: Vec<(String, ServiceHandle)>) -> Self {
        Self { resolved }
    }

    /// Number of resolved dependencies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    /// Whether the manifest was empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    /// Positional handle, in declaration order.
    #[must_use]
    pub fn handle(&self, index: usize) -> Option<&ServiceHandle> {
        self.resolved.get(index).map(|(_, handle)| handle)
    }

    /// Typed dependency by declared name.
    ///
    /// # Errors
    ///
    /// [`HostError::NotFound`] if the name is not in the manifest,
    /// [`HostError::Validation`] if the instance is not an `S`.
    pub fn get<S: Service>(&self, name: &str) -> Result<Arc<S>> {
        let handle = self
            .resolved
            .iter()
            .find(|(declared, _)| declared == name)
            .map(|(_, handle)| handle)
            .ok_or_else(|| HostError::NotFound(name.to_string()))?;
        downcast_dependency(name, handle)
    }

    /// Typed dependency by position.
    ///
    /// # Errors
    ///
    /// [`HostError::NotFound`] if the index is out of range,
    /// [`HostError::Validation`] if the instance is not an `S`.
    pub fn at<S: Service>(&self, index: usize) -> Result<Arc<S>> {
        let (name, handle) = self
            .resolved
            .get(index)
            .ok_or_else(|| HostError::NotFound(format!("dependency #{index}")))?;
        downcast_dependency(name, handle)
    }

    /// Iterate `(name, handle)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ServiceHandle)> {
        self.resolved
            .iter()
            .map(|(name, handle)| (name.as_str(), handle))
    }
}

fn downcast_dependency<S: Service>(name: &str, handle: &ServiceHandle) -> Result<Arc<S>> {
    handle.downcast::<S>().ok_or_else(|| {
        HostError::Validation(format!(
            "dependency {name} is a {}, not a {}",
            handle.type_name(),
            std::any::type_name::<S>()
        ))
    })
}

/// Constructs a service once its declared dependencies exist.
pub trait ServiceFactory: Send + Sync + 'static {
    /// Concrete service type produced.
    type Service: Service;

    /// Explicit name to register the constructed service under.
    ///
    /// `None` registers it under its own [`Service::service_name`], the name
    /// an instance registration of the same service gets.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Names of the services that must exist before construction.
    fn dependencies(&self) -> &[String];

    /// Build the service from its resolved dependencies.
    ///
    /// # Errors
    ///
    /// Any error aborts the registration that triggered construction.
    fn construct(&self, dependencies: Dependencies) -> Result<Arc<Self::Service>>;
}

/// Object-safe view of a [`ServiceFactory`], used for batch registration.
pub trait DynFactory: Send + Sync {
    /// See [`ServiceFactory::name`].
    fn name(&self) -> Option<&str>;

    /// Full type name of the constructed service.
    fn service_type(&self) -> &'static str;

    /// Name used while the service does not exist yet: the explicit name, or
    /// the short type name.
    fn label(&self) -> &str {
        self.name()
            .unwrap_or_else(|| short_type_name(self.service_type()))
    }

    /// See [`ServiceFactory::dependencies`].
    fn dependencies(&self) -> &[String];

    /// Construct and erase the concrete type.
    ///
    /// # Errors
    ///
    /// Propagates [`ServiceFactory::construct`] failures.
    fn construct_handle(&self, dependencies: Dependencies) -> Result<ServiceHandle>;
}

impl<F: ServiceFactory> DynFactory for F {
    fn name(&self) -> Option<&str> {
        ServiceFactory::name(self)
    }

    fn service_type(&self) -> &'static str {
        std::any::type_name::<F::Service>()
    }

    fn dependencies(&self) -> &[String] {
        ServiceFactory::dependencies(self)
    }

    fn construct_handle(&self, dependencies: Dependencies) -> Result<ServiceHandle> {
        self.construct(dependencies).map(ServiceHandle::new)
    }
}

/// Factory built from a closure and an explicit dependency manifest.
pub struct FnFactory<S, F> {
    name: Option<String>,
    dependencies: Vec<String>,
    construct: F,
    _service: PhantomData<fn() -> S>,
}

impl<S, F> FnFactory<S, F>
where
    S: Service,
    F: Fn(Dependencies) -> Result<Arc<S>> + Send + Sync + 'static,
{
    /// Create a factory whose service registers under its own name.
    #[must_use]
    pub fn new(dependencies: &[&str], construct: F) -> Self {
        Self {
            name: None,
            dependencies: dependencies.iter().map(|d| (*d).to_string()).collect(),
            construct,
            _service: PhantomData,
        }
    }

    /// Register under a different name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl<S, F> ServiceFactory for FnFactory<S, F>
where
    S: Service,
    F: Fn(Dependencies) -> Result<Arc<S>> + Send + Sync + 'static,
{
    type Service = S;

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    fn construct(&self, dependencies: Dependencies) -> Result<Arc<S>> {
        (self.construct)(dependencies)
    }
}

/// Shorthand for [`FnFactory::new`].
#[must_use]
pub fn factory<S, F>(dependencies: &[&str], construct: F) -> FnFactory<S, F>
where
    S: Service,
    F: Fn(Dependencies) -> Result<Arc<S>> + Send + Sync + 'static,
{
    FnFactory::new(dependencies, construct)
}
