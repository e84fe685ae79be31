//! Fixture services with predictable behaviour.

use chrono::{DateTime, Utc};
use http::Method;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use svchost_core::{
    Description, Exposed, Function, HookFuture, HostError, Layer, Node, Result, Service,
    ServiceConfig,
};

/// Clock service returning a fixed instant.
///
/// # Example
///
/// ```
/// use svchost_testing::fixtures::ClockService;
///
/// let clock = ClockService::fixed_default();
/// assert_eq!(clock.now(), clock.now());
/// ```
#[derive(Debug, Clone)]
pub struct ClockService {
    time: DateTime<Utc>,
}

impl ClockService {
    /// Clock frozen at `time`.
    #[must_use]
    pub const fn fixed(time: DateTime<Utc>) -> Self {
        Self { time }
    }

    /// Clock frozen at 2025-01-01 00:00:00 UTC.
    #[must_use]
    pub fn fixed_default() -> Self {
        Self::fixed(DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default())
    }

    /// Current (frozen) time.
    #[must_use]
    pub const fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

impl Service for ClockService {
    fn exposed(self: Arc<Self>) -> Option<Arc<dyn Exposed>> {
        Some(self)
    }
}

impl Exposed for ClockService {
    fn describe(self: Arc<Self>) -> Description {
        Description::new().date("now", self.time)
    }
}

/// Object graph covering every kind of member the protocol handles.
///
/// - `greeting`: string, `numbers`: array, `foo.bar`: 42, `nothing`: null
/// - `started`: date
/// - `echo(value)`: returns its argument, `silent()`: returns nothing
/// - `fail()`: returns an unexpected error, `teapot()`: an HTTP 418
/// - `_secret`, `$hidden`: private members
/// - `ping()`: inherited from the `Pingable` layer
#[derive(Debug, Default)]
pub struct EchoService;

impl Service for EchoService {
    fn exposed(self: Arc<Self>) -> Option<Arc<dyn Exposed>> {
        Some(self)
    }
}

impl Exposed for EchoService {
    fn type_names(&self) -> Vec<String> {
        vec!["EchoService".to_string(), "Pingable".to_string()]
    }

    fn describe(self: Arc<Self>) -> Description {
        Description::new()
            .data("greeting", "hello")
            .data("numbers", json!([1, 2, 3]))
            .data("foo", json!({"bar": 42}))
            .data("nothing", Value::Null)
            .date("started", ClockService::fixed_default().now())
            .data("_secret", "do not leak")
            .data("$hidden", "do not leak")
            .method(
                "echo",
                Function::sync(&["value"], |args| {
                    Ok(args.into_iter().next().map_or(Node::Undefined, Node::Data))
                })
                .with_property("description", json!("Returns its argument")),
            )
            .method("silent", Function::sync(&[], |_| Ok(Node::Undefined)))
            .method(
                "fail",
                Function::sync(&[], |_| Err(HostError::unexpected("echo failure"))),
            )
            .method(
                "teapot",
                Function::sync(&[], |_| Err(HostError::http(418))),
            )
            .layer(Layer::new("Pingable").method(
                "ping",
                Function::sync(&[], |_| Ok(Node::Data(json!("pong")))),
            ))
    }
}

/// Counter depending on a [`ClockService`].
///
/// Exposes `count`, `updated`, `increment()`, `add(amount)` and accepts
/// `PUT {"count": n}` to overwrite the count.
#[derive(Debug)]
pub struct CounterService {
    clock: Arc<ClockService>,
    count: AtomicI64,
}

impl CounterService {
    /// Counter starting at zero.
    #[must_use]
    pub const fn new(clock: Arc<ClockService>) -> Self {
        Self {
            clock,
            count: AtomicI64::new(0),
        }
    }

    /// Current count.
    #[must_use]
    pub fn count(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Add `amount`, returning the new count.
    pub fn add(&self, amount: i64) -> i64 {
        self.count.fetch_add(amount, Ordering::SeqCst) + amount
    }

    /// Overwrite the count.
    pub fn set(&self, count: i64) {
        self.count.store(count, Ordering::SeqCst);
    }
}

impl Service for CounterService {
    fn exposed(self: Arc<Self>) -> Option<Arc<dyn Exposed>> {
        Some(self)
    }
}

impl Exposed for CounterService {
    fn describe(self: Arc<Self>) -> Description {
        let increment = Arc::clone(&self);
        let add = Arc::clone(&self);
        let put = Arc::clone(&self);

        Description::new()
            .data("count", self.count())
            .date("updated", self.clock.now())
            .method(
                "increment",
                Function::sync(&[], move |_| Ok(Node::Data(json!(increment.add(1))))),
            )
            .method(
                "add",
                Function::sync(&["amount"], move |args| {
                    let amount = args.first().and_then(Value::as_i64).ok_or_else(|| {
                        HostError::http_with_message(400, "amount must be an integer")
                    })?;
                    Ok(Node::Data(json!(add.add(amount))))
                }),
            )
            .on_method(Method::PUT, move |ctx| {
                let counter = Arc::clone(&put);
                async move {
                    let count = ctx
                        .json_body()
                        .await?
                        .and_then(|body| body.get("count").and_then(Value::as_i64))
                        .ok_or_else(|| HostError::http_with_message(400, "count is required"))?;
                    counter.set(count);
                    Ok::<_, HostError>(Node::Data(json!(count)))
                }
            })
    }
}

/// Service recording every lifecycle hook invocation.
#[derive(Debug)]
pub struct HookRecorder {
    name: &'static str,
    calls: Mutex<Vec<&'static str>>,
    config: Mutex<Option<ServiceConfig>>,
    fail_on: Option<&'static str>,
    delay: Duration,
}

impl HookRecorder {
    /// Recorder registered under `name`.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            calls: Mutex::new(Vec::new()),
            config: Mutex::new(None),
            fail_on: None,
            delay: Duration::ZERO,
        }
    }

    /// Fail the named hook (`"config"`, `"init"` or `"run"`).
    #[must_use]
    pub const fn failing_on(mut self, hook: &'static str) -> Self {
        self.fail_on = Some(hook);
        self
    }

    /// Sleep this long inside every hook.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Hook names in invocation order.
    #[must_use]
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many times `hook` ran.
    #[must_use]
    pub fn count(&self, hook: &str) -> usize {
        self.calls().iter().filter(|call| **call == hook).count()
    }

    /// Configuration received by `on_config`.
    #[must_use]
    pub fn config(&self) -> Option<ServiceConfig> {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn hook(&self, hook: &'static str) -> Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_on == Some(hook) {
            return Err(HostError::unexpected(format!("{} failed in {hook}", self.name)));
        }
        Ok(())
    }
}

impl Service for HookRecorder {
    fn service_name(&self) -> &'static str {
        self.name
    }

    fn on_config<'a>(&'a self, config: &'a ServiceConfig) -> Option<HookFuture<'a>> {
        Some(Box::pin(async move {
            *self.config.lock().unwrap_or_else(PoisonError::into_inner) = Some(config.clone());
            self.hook("config").await
        }))
    }

    fn on_init(&self) -> Option<HookFuture<'_>> {
        Some(Box::pin(self.hook("init")))
    }

    fn on_run(&self) -> Option<HookFuture<'_>> {
        Some(Box::pin(self.hook("run")))
    }
}

/// Service without hooks or exposure.
#[derive(Debug, Default)]
pub struct Inert;

impl Service for Inert {}
