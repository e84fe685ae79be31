//! Service registry: dependency injection and lifecycle orchestration.
//!
//! The registry owns one record per registered instance. Records are created
//! by [`ServiceRegistry::register`], advanced by the phase calls and removed
//! by [`ServiceRegistry::unregister`].
//!
//! # Lifecycle
//!
//! ```text
//! Registered → [Configuring] → Configured → [Initializing] → Initialized → [Running]
//! ```
//!
//! Bracketed phases are only entered by services with the matching hook.
//! Every transition runs at most once per record: concurrent callers share a
//! single in-flight future and observe the same outcome. Asking for a phase
//! whose predecessor has not completed fails with
//! [`HostError::LifecycleOrder`].
//!
//! # Dependencies
//!
//! Factories name their dependencies. Registration waits, with exponential
//! backoff, until every named service exists, then constructs the service
//! with the resolved instances.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use svchost_core::{Dependencies, Service, factory};
//! use svchost_runtime::ServiceRegistry;
//!
//! struct Clock;
//! impl Service for Clock {}
//!
//! struct Counter {
//!     clock: Arc<Clock>,
//! }
//! impl Service for Counter {}
//!
//! # async fn example() -> svchost_core::Result<()> {
//! let registry = ServiceRegistry::new();
//! registry.register_instance(Arc::new(Clock));
//! registry
//!     .register_factory(factory(&["Clock"], |deps: Dependencies| {
//!         Ok(Arc::new(Counter { clock: deps.get("Clock")? }))
//!     }))
//!     .await?;
//!
//! registry.config_all(&serde_json::json!({})).await?;
//! registry.init_all().await?;
//! registry.run_all().await?;
//! # Ok(())
//! # }
//! ```

use crate::metrics::RegistryMetrics;
use crate::retry::{RetryPolicy, wait_for_dependencies};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared, try_join_all};
use std::any::TypeId;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use svchost_core::{
    Dependencies, DynFactory, Exposed, HostError, Phase, Result, Service, ServiceConfig,
    ServiceFactory, ServiceHandle,
};
use tokio::sync::broadcast;
use tokio::time::Instant;
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

/// How callers address services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Exact record id
    Id(Uuid),
    /// Registered name
    Name(String),
    /// Concrete type, with its name for messages
    Type(TypeId, &'static str),
}

impl Selector {
    /// Select by concrete type `S`.
    #[must_use]
    pub fn of<S: Service>() -> Self {
        Self::Type(TypeId::of::<S>(), std::any::type_name::<S>())
    }
}

impl From<Uuid> for Selector {
    fn from(id: Uuid) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for Selector {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for Selector {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => f.write_str(name),
            Self::Type(_, type_name) => f.write_str(type_name),
        }
    }
}

/// Input to [`ServiceRegistry::register`].
pub enum Registration {
    /// An already constructed instance
    Instance(ServiceHandle),
    /// A factory waiting on its dependency manifest
    Factory(Box<dyn DynFactory>),
    /// Several registrations, processed in order
    Batch(Vec<Registration>),
}

impl Registration {
    /// Register a constructed instance.
    #[must_use]
    pub fn instance<S: Service>(service: Arc<S>) -> Self {
        Self::Instance(ServiceHandle::new(service))
    }

    /// Register through a factory.
    #[must_use]
    pub fn factory<F: ServiceFactory>(factory: F) -> Self {
        Self::Factory(Box::new(factory))
    }

    /// Register several inputs in order.
    #[must_use]
    pub fn batch(items: impl IntoIterator<Item = Self>) -> Self {
        Self::Batch(items.into_iter().collect())
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(handle) => f.debug_tuple("Instance").field(&handle.name()).finish(),
            Self::Factory(factory) => f.debug_tuple("Factory").field(&factory.label()).finish(),
            Self::Batch(items) => f.debug_tuple("Batch").field(items).finish(),
        }
    }
}

/// Registry change notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A record was created
    Registered {
        /// Record id
        id: Uuid,
        /// Registered name
        name: String,
        /// When it happened
        at: DateTime<Utc>,
    },
    /// A record was removed
    Unregistered {
        /// Record id
        id: Uuid,
        /// Registered name
        name: String,
        /// When it happened
        at: DateTime<Utc>,
    },
}

impl RegistryEvent {
    /// Record id the event is about.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        match self {
            Self::Registered { id, .. } | Self::Unregistered { id, .. } => *id,
        }
    }
}

type Transition = Shared<BoxFuture<'static, Result<()>>>;

#[derive(Clone, Copy)]
enum Step {
    Configure,
    Initialize,
    Run,
}

impl Step {
    const fn label(self) -> &'static str {
        match self {
            Self::Configure => "configure",
            Self::Initialize => "initialize",
            Self::Run => "run",
        }
    }

    const fn required(self) -> Phase {
        match self {
            Self::Configure => Phase::Registered,
            Self::Initialize => Phase::Configured,
            Self::Run => Phase::Initialized,
        }
    }

    const fn in_flight(self) -> Phase {
        match self {
            Self::Configure => Phase::Configuring,
            Self::Initialize => Phase::Initializing,
            Self::Run => Phase::Running,
        }
    }

    const fn done(self) -> Phase {
        match self {
            Self::Configure => Phase::Configured,
            Self::Initialize => Phase::Initialized,
            Self::Run => Phase::Running,
        }
    }
}

struct Lifecycle {
    phase: Phase,
    configure: Option<Transition>,
    initialize: Option<Transition>,
    run: Option<Transition>,
}

impl Lifecycle {
    fn slot(&mut self, step: Step) -> &mut Option<Transition> {
        match step {
            Step::Configure => &mut self.configure,
            Step::Initialize => &mut self.initialize,
            Step::Run => &mut self.run,
        }
    }
}

struct ServiceRecord {
    id: Uuid,
    name: String,
    handle: ServiceHandle,
    lifecycle: Mutex<Lifecycle>,
}

impl ServiceRecord {
    fn new(name: String, handle: ServiceHandle) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            handle,
            lifecycle: Mutex::new(Lifecycle {
                phase: Phase::Registered,
                configure: None,
                initialize: None,
                run: None,
            }),
        }
    }

    fn phase(&self) -> Phase {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .phase
    }

    fn set_phase(&self, phase: Phase) {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .phase = phase;
    }

    fn matches(&self, selector: &Selector) -> bool {
        match selector {
            Selector::Id(id) => self.id == *id,
            Selector::Name(name) => self.name == *name,
            Selector::Type(type_id, _) => self.handle.type_id() == *type_id,
        }
    }

    /// Start `step`, or join it if it already started.
    fn transition(self: &Arc<Self>, step: Step, config: &Arc<ServiceConfig>) -> Result<Transition> {
        let mut lifecycle = self
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(pending) = lifecycle.slot(step) {
            return Ok(pending.clone());
        }

        if lifecycle.phase < step.required() {
            return Err(HostError::LifecycleOrder {
                service: self.name.clone(),
                id: self.id,
                required: step.required(),
            });
        }

        let transition = Self::drive(Arc::clone(self), step, Arc::clone(config))
            .boxed()
            .shared();
        *lifecycle.slot(step) = Some(transition.clone());
        Ok(transition)
    }

    async fn drive(record: Arc<Self>, step: Step, config: Arc<ServiceConfig>) -> Result<()> {
        let started = Instant::now();
        let service = record.handle.service();
        let hook = match step {
            Step::Configure => service.on_config(&config),
            Step::Initialize => service.on_init(),
            Step::Run => service.on_run(),
        };

        let outcome = match hook {
            Some(hook) => {
                record.set_phase(step.in_flight());
                tracing::debug!(service = %record.name, id = %record.id, phase = %step.in_flight(), "Lifecycle hook started");
                hook.await
            },
            None => Ok(()),
        };

        RegistryMetrics::record_transition(step.label(), outcome.is_ok(), started.elapsed());
        match &outcome {
            Ok(()) => {
                record.set_phase(step.done());
                tracing::debug!(service = %record.name, id = %record.id, phase = %step.done(), "Lifecycle transition complete");
            },
            Err(e) => {
                tracing::error!(service = %record.name, id = %record.id, step = step.label(), error = %e, "Lifecycle hook failed");
            },
        }
        outcome
    }
}

/// Dependency-injection container with a Configure → Initialize → Run lifecycle.
///
/// Cheap to share: wrap it in an `Arc` and hand clones to anything that needs
/// to look services up.
pub struct ServiceRegistry {
    records: RwLock<Vec<Arc<ServiceRecord>>>,
    events: broadcast::Sender<RegistryEvent>,
    retry: RetryPolicy,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.names())
            .field("retry", &self.retry)
            .finish()
    }
}

impl ServiceRegistry {
    /// Empty registry with the default dependency-wait policy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_retry_policy(RetryPolicy::default())
    }

    /// Empty registry with a custom dependency-wait policy.
    #[must_use]
    pub fn with_retry_policy(retry: RetryPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            records: RwLock::new(Vec::new()),
            events,
            retry,
        }
    }

    /// Dependency-wait policy in use.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Subscribe to registration changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    // ═══════════════════════════════════════════════════════════
    // Registration
    // ═══════════════════════════════════════════════════════════

    /// Register a constructed instance under its service name.
    pub fn register_instance<S: Service>(&self, service: Arc<S>) -> Uuid {
        self.register_handle(ServiceHandle::new(service))
    }

    /// Register a type-erased instance under its service name.
    pub fn register_handle(&self, handle: ServiceHandle) -> Uuid {
        self.insert(handle.name().to_string(), handle)
    }

    /// Wait for the factory's dependencies, construct, register.
    ///
    /// # Errors
    ///
    /// [`HostError::DependencyTimeout`] if the dependencies do not appear
    /// within the retry policy, or any error returned by the factory.
    pub async fn register_factory<F: ServiceFactory>(&self, factory: F) -> Result<Uuid> {
        self.register_dyn(&factory).await
    }

    /// Process any [`Registration`], returning the new ids in order.
    ///
    /// A batch stops at its first failure; earlier elements stay registered.
    ///
    /// # Errors
    ///
    /// The first failing element's error.
    pub fn register(&self, registration: Registration) -> BoxFuture<'_, Result<Vec<Uuid>>> {
        Box::pin(async move {
            match registration {
                Registration::Instance(handle) => Ok(vec![self.register_handle(handle)]),
                Registration::Factory(factory) => {
                    Ok(vec![self.register_dyn(factory.as_ref()).await?])
                },
                Registration::Batch(items) => {
                    let mut ids = Vec::with_capacity(items.len());
                    for item in items {
                        ids.extend(self.register(item).await?);
                    }
                    Ok(ids)
                },
            }
        })
    }

    async fn register_dyn(&self, factory: &dyn DynFactory) -> Result<Uuid> {
        let name = factory.label().to_string();
        let manifest = factory.dependencies().to_vec();

        let dependencies = wait_for_dependencies(&self.retry, &name, || {
            self.resolve_manifest(&name, &manifest)
        })
        .await
        .inspect_err(|e| {
            if matches!(e, HostError::DependencyTimeout { .. }) {
                RegistryMetrics::record_dependency_timeout();
                tracing::error!(service = %name, error = %e, "Gave up waiting for dependencies");
            }
        })?;

        let handle = factory.construct_handle(dependencies)?;
        let registered = factory
            .name()
            .map_or_else(|| handle.name().to_string(), str::to_string);
        Ok(self.insert(registered, handle))
    }

    fn resolve_manifest(&self, name: &str, manifest: &[String]) -> Result<Dependencies> {
        let records = self.read_records();
        let mut resolved = Vec::with_capacity(manifest.len());
        let mut missing = Vec::new();

        for dependency in manifest {
            match records.iter().find(|r| r.name == *dependency) {
                Some(record) => resolved.push((dependency.clone(), record.handle.clone())),
                None => missing.push(dependency.clone()),
            }
        }

        if missing.is_empty() {
            Ok(Dependencies::new(resolved))
        } else {
            tracing::info!(service = %name, missing = ?missing, "Waiting for dependencies");
            Err(HostError::DependencyTimeout {
                service: name.to_string(),
                missing,
            })
        }
    }

    fn insert(&self, name: String, handle: ServiceHandle) -> Uuid {
        let record = Arc::new(ServiceRecord::new(name.clone(), handle));
        let id = record.id;

        let active = {
            let mut records = self.write_records();
            records.push(record);
            records.len()
        };

        RegistryMetrics::record_registered(active);
        tracing::info!(id = %id, name = %name, "Service registered");
        // No subscribers is fine.
        let _ = self.events.send(RegistryEvent::Registered {
            id,
            name,
            at: Utc::now(),
        });
        id
    }

    /// Remove every record matching `selector`, returning their ids.
    ///
    /// The instances themselves are left alone.
    pub fn unregister(&self, selector: impl Into<Selector>) -> Vec<Uuid> {
        let selector = selector.into();
        let (removed, active) = {
            let mut records = self.write_records();
            let (removed, kept): (Vec<_>, Vec<_>) =
                records.drain(..).partition(|r| r.matches(&selector));
            *records = kept;
            (removed, records.len())
        };

        removed
            .into_iter()
            .map(|record| {
                RegistryMetrics::record_unregistered(active);
                tracing::info!(id = %record.id, name = %record.name, "Service unregistered");
                let _ = self.events.send(RegistryEvent::Unregistered {
                    id: record.id,
                    name: record.name.clone(),
                    at: Utc::now(),
                });
                record.id
            })
            .collect()
    }

    // ═══════════════════════════════════════════════════════════
    // Lookup
    // ═══════════════════════════════════════════════════════════

    /// The single service matching `selector`, as an `S`.
    ///
    /// # Errors
    ///
    /// [`HostError::NotFound`] on zero matches, [`HostError::Ambiguous`] on
    /// more than one, [`HostError::Validation`] if the match is not an `S`.
    pub fn get<S: Service>(&self, selector: impl Into<Selector>) -> Result<Arc<S>> {
        let selector = selector.into();
        let record = self.find_one(&selector)?;
        downcast(&record)
    }

    /// The single service of type `S`.
    ///
    /// # Errors
    ///
    /// As [`ServiceRegistry::get`].
    pub fn get_by_type<S: Service>(&self) -> Result<Arc<S>> {
        self.get(Selector::of::<S>())
    }

    /// Every service matching `selector`, as `S`, in registration order.
    ///
    /// # Errors
    ///
    /// [`HostError::NotFound`] on zero matches, [`HostError::Validation`] if
    /// a match is not an `S`.
    pub fn get_all<S: Service>(&self, selector: impl Into<Selector>) -> Result<Vec<Arc<S>>> {
        let selector = selector.into();
        self.find_all(&selector)?
            .iter()
            .map(downcast::<S>)
            .collect()
    }

    /// Type-erased handle of the single service matching `selector`.
    ///
    /// # Errors
    ///
    /// [`HostError::NotFound`] or [`HostError::Ambiguous`].
    pub fn get_handle(&self, selector: impl Into<Selector>) -> Result<ServiceHandle> {
        let selector = selector.into();
        Ok(self.find_one(&selector)?.handle.clone())
    }

    /// Handles of every registered service, in registration order.
    #[must_use]
    pub fn handles(&self) -> Vec<(Uuid, ServiceHandle)> {
        self.read_records()
            .iter()
            .map(|r| (r.id, r.handle.clone()))
            .collect()
    }

    /// Root of the object graph exposed by the service matching `selector`.
    ///
    /// # Errors
    ///
    /// As [`ServiceRegistry::get_handle`], or [`HostError::Validation`] if
    /// the service exposes nothing.
    pub fn get_exposed(&self, selector: impl Into<Selector>) -> Result<Arc<dyn Exposed>> {
        let selector = selector.into();
        let record = self.find_one(&selector)?;
        record.handle.exposed().ok_or_else(|| {
            HostError::Validation(format!("service {} does not expose an object graph", record.name))
        })
    }

    /// Name registered for `id`.
    #[must_use]
    pub fn name_of(&self, id: Uuid) -> Option<String> {
        self.read_records()
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.name.clone())
    }

    /// All record ids, in registration order.
    #[must_use]
    pub fn ids(&self) -> Vec<Uuid> {
        self.read_records().iter().map(|r| r.id).collect()
    }

    /// All registered names, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.read_records().iter().map(|r| r.name.clone()).collect()
    }

    /// Current phase of the single service matching `selector`.
    ///
    /// # Errors
    ///
    /// [`HostError::NotFound`] or [`HostError::Ambiguous`].
    pub fn phase_of(&self, selector: impl Into<Selector>) -> Result<Phase> {
        let selector = selector.into();
        Ok(self.find_one(&selector)?.phase())
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_records().len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_records().is_empty()
    }

    // ═══════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════

    /// Configure the single service matching `selector`.
    ///
    /// # Errors
    ///
    /// Lookup errors or the hook's error.
    pub async fn config(&self, selector: impl Into<Selector>, config: &ServiceConfig) -> Result<()> {
        let selector = selector.into();
        let record = self.find_one(&selector)?;
        record
            .transition(Step::Configure, &Arc::new(config.clone()))?
            .await
    }

    /// Initialize the single service matching `selector`.
    ///
    /// # Errors
    ///
    /// Lookup errors, [`HostError::LifecycleOrder`] if it is not configured,
    /// or the hook's error.
    pub async fn init(&self, selector: impl Into<Selector>) -> Result<()> {
        let selector = selector.into();
        let record = self.find_one(&selector)?;
        record.transition(Step::Initialize, &empty_config())?.await
    }

    /// Run the single service matching `selector`.
    ///
    /// # Errors
    ///
    /// Lookup errors, [`HostError::LifecycleOrder`] if it is not initialized,
    /// or the hook's error.
    pub async fn run(&self, selector: impl Into<Selector>) -> Result<()> {
        let selector = selector.into();
        let record = self.find_one(&selector)?;
        record.transition(Step::Run, &empty_config())?.await
    }

    /// Configure every unconfigured service, concurrently.
    ///
    /// Configure hooks may register more services, so this keeps going until
    /// no unconfigured record remains.
    ///
    /// # Errors
    ///
    /// The first hook error.
    pub async fn config_all(&self, config: &ServiceConfig) -> Result<()> {
        let config = Arc::new(config.clone());
        loop {
            let pending: Vec<_> = self
                .snapshot()
                .into_iter()
                .filter(|r| !r.phase().is_configured())
                .collect();
            if pending.is_empty() {
                return Ok(());
            }

            tracing::debug!(count = pending.len(), "Configuring services");
            let transitions = pending
                .iter()
                .map(|r| r.transition(Step::Configure, &config))
                .collect::<Result<Vec<_>>>()?;
            try_join_all(transitions).await?;
        }
    }

    /// Initialize every service, concurrently.
    ///
    /// # Errors
    ///
    /// [`HostError::LifecycleOrder`] if any service is not configured, or the
    /// first hook error.
    pub async fn init_all(&self) -> Result<()> {
        self.advance_all(Step::Initialize).await
    }

    /// Run every service, concurrently.
    ///
    /// # Errors
    ///
    /// [`HostError::LifecycleOrder`] if any service is not initialized, or
    /// the first hook error.
    pub async fn run_all(&self) -> Result<()> {
        self.advance_all(Step::Run).await
    }

    async fn advance_all(&self, step: Step) -> Result<()> {
        let config = empty_config();
        let records = self.snapshot();
        tracing::debug!(count = records.len(), step = step.label(), "Advancing services");
        let transitions = records
            .iter()
            .map(|r| r.transition(step, &config))
            .collect::<Result<Vec<_>>>()?;
        try_join_all(transitions).await?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════

    fn read_records(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<ServiceRecord>>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_records(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<ServiceRecord>>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Vec<Arc<ServiceRecord>> {
        self.read_records().clone()
    }

    fn find_all(&self, selector: &Selector) -> Result<Vec<Arc<ServiceRecord>>> {
        let matches: Vec<_> = self
            .read_records()
            .iter()
            .filter(|r| r.matches(selector))
            .cloned()
            .collect();
        if matches.is_empty() {
            return Err(HostError::NotFound(selector.to_string()));
        }
        Ok(matches)
    }

    fn find_one(&self, selector: &Selector) -> Result<Arc<ServiceRecord>> {
        let mut matches = self.find_all(selector)?;
        if matches.len() > 1 {
            return Err(HostError::Ambiguous(selector.to_string()));
        }
        matches
            .pop()
            .ok_or_else(|| HostError::NotFound(selector.to_string()))
    }
}

fn empty_config() -> Arc<ServiceConfig> {
    Arc::new(ServiceConfig::Null)
}

fn downcast<S: Service>(record: &Arc<ServiceRecord>) -> Result<Arc<S>> {
    record.handle.downcast::<S>().ok_or_else(|| {
        HostError::Validation(format!(
            "service {} is a {}, not a {}",
            record.name,
            record.handle.type_name(),
            std::any::type_name::<S>()
        ))
    })
}
