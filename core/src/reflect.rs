//! Introspection model for exposed object graphs.
//!
//! Services do not hand the protocol layer arbitrary memory to poke at.
//! Instead, an exposed object implements [`Exposed::describe`], returning a
//! [`Description`] of its current members:
//!
//! - own members (`name → Node`) in declaration order,
//! - capability [`Layer`]s holding inherited methods, most-derived first,
//! - custom handlers keyed by HTTP method.
//!
//! The protocol router walks [`Node`]s produced here; the envelope codec
//! serializes them.

use crate::context::RequestContext;
use crate::error::Result;
use crate::service::short_type_name;
use chrono::{DateTime, Utc};
use http::Method;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Future produced by invoking a [`Function`] or a [`MethodHandler`].
pub type CallFuture = Pin<Box<dyn Future<Output = Result<Node>> + Send>>;

/// Custom per-HTTP-method handler attached to an exposed object.
pub type MethodHandler = Arc<dyn Fn(Arc<RequestContext>) -> CallFuture + Send + Sync>;

type Invoker = Arc<dyn Fn(Vec<Value>) -> CallFuture + Send + Sync>;

/// A value reachable in an exposed object graph.
#[derive(Clone)]
pub enum Node {
    /// No value (a call that returned nothing)
    Undefined,
    /// Plain JSON data
    Data(Value),
    /// A point in time
    Date(DateTime<Utc>),
    /// A callable member
    Function(Function),
    /// A nested exposed object
    Object(Arc<dyn Exposed>),
}

impl Node {
    /// Wrap a concrete exposed object.
    #[must_use]
    pub fn object<E: Exposed + 'static>(object: Arc<E>) -> Self {
        Self::Object(object)
    }

    /// Serialize any value into a data node.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Validation`](crate::HostError::Validation) if the
    /// value cannot be represented as JSON.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::Data(serde_json::to_value(value)?))
    }

    /// Short label for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Data(_) => "data",
            Self::Date(_) => "date",
            Self::Function(_) => "function",
            Self::Object(_) => "object",
        }
    }

    /// Whether this node is missing or JSON `null`.
    #[must_use]
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Undefined | Self::Data(Value::Null))
    }

    /// Member named `name`, without any visibility filtering.
    ///
    /// JSON objects are walked by key, JSON arrays by numeric index, functions
    /// by their own properties, exposed objects through their description.
    /// Scalars have no members.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<Self> {
        match self {
            Self::Data(Value::Object(map)) => map.get(name).cloned().map(Self::Data),
            Self::Data(Value::Array(items)) => name
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index))
                .cloned()
                .map(Self::Data),
            Self::Function(function) => function.properties.get(name).cloned().map(Self::Data),
            Self::Object(object) => Arc::clone(object).describe().lookup(name),
            Self::Undefined | Self::Data(_) | Self::Date(_) => None,
        }
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        Self::Data(value)
    }
}

impl From<DateTime<Utc>> for Node {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Date(value)
    }
}

impl From<Function> for Node {
    fn from(value: Function) -> Self {
        Self::Function(value)
    }
}

impl From<Arc<dyn Exposed>> for Node {
    fn from(value: Arc<dyn Exposed>) -> Self {
        Self::Object(value)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("Undefined"),
            Self::Data(value) => f.debug_tuple("Data").field(value).finish(),
            Self::Date(value) => f.debug_tuple("Date").field(value).finish(),
            Self::Function(function) => f.debug_tuple("Function").field(function).finish(),
            Self::Object(object) => f.debug_tuple("Object").field(&object.type_names()).finish(),
        }
    }
}

/// A callable member bound to its holder.
#[derive(Clone)]
pub struct Function {
    params: Arc<[String]>,
    properties: Map<String, Value>,
    invoke: Invoker,
}

impl Function {
    /// Wrap an async closure taking positional JSON arguments.
    pub fn new<F, Fut>(params: &[&str], f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Node>> + Send + 'static,
    {
        Self {
            params: params.iter().map(|p| (*p).to_string()).collect(),
            properties: Map::new(),
            invoke: Arc::new(move |args| Box::pin(f(args))),
        }
    }

    /// Wrap a synchronous closure.
    pub fn sync<F>(params: &[&str], f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Node> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(params, move |args| {
            let f = Arc::clone(&f);
            async move { f(args) }
        })
    }

    /// Attach an own data property, visible when the function itself is read.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    /// Declared parameter names.
    #[must_use]
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Own data properties.
    #[must_use]
    pub const fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    /// Invoke with positional arguments.
    #[must_use]
    pub fn call(&self, args: Vec<Value>) -> CallFuture {
        (self.invoke)(args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("params", &self.params)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

/// Inherited methods contributed by one ancestor in a capability chain.
#[derive(Debug, Clone)]
pub struct Layer {
    name: String,
    methods: Vec<(String, Function)>,
}

impl Layer {
    /// Empty layer named after its capability.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// Add a method.
    #[must_use]
    pub fn method(mut self, name: impl Into<String>, function: Function) -> Self {
        self.methods.push((name.into(), function));
        self
    }

    /// Capability name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Methods in declaration order.
    #[must_use]
    pub fn methods(&self) -> &[(String, Function)] {
        &self.methods
    }
}

/// Snapshot of an exposed object's members.
#[derive(Clone, Default)]
pub struct Description {
    members: Vec<(String, Node)>,
    layers: Vec<Layer>,
    handlers: Vec<(Method, MethodHandler)>,
}

impl Description {
    /// Empty description.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an own member.
    #[must_use]
    pub fn member(mut self, name: impl Into<String>, node: impl Into<Node>) -> Self {
        self.members.push((name.into(), node.into()));
        self
    }

    /// Add an own data member.
    #[must_use]
    pub fn data(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.member(name, Node::Data(value.into()))
    }

    /// Add an own date member.
    #[must_use]
    pub fn date(self, name: impl Into<String>, value: DateTime<Utc>) -> Self {
        self.member(name, Node::Date(value))
    }

    /// Add an own method.
    #[must_use]
    pub fn method(self, name: impl Into<String>, function: Function) -> Self {
        self.member(name, Node::Function(function))
    }

    /// Add a nested exposed object.
    #[must_use]
    pub fn object(self, name: impl Into<String>, object: Arc<dyn Exposed>) -> Self {
        self.member(name, Node::Object(object))
    }

    /// Append a capability layer (most-derived first).
    #[must_use]
    pub fn layer(mut self, layer: Layer) -> Self {
        self.layers.push(layer);
        self
    }

    /// Handle requests with `method` that end at this object.
    #[must_use]
    pub fn on_method<F, Fut>(mut self, method: Method, handler: F) -> Self
    where
        F: Fn(Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Node>> + Send + 'static,
    {
        let handler: MethodHandler = Arc::new(move |ctx| Box::pin(handler(ctx)));
        self.handlers.push((method, handler));
        self
    }

    /// Own members in declaration order.
    #[must_use]
    pub fn members(&self) -> &[(String, Node)] {
        &self.members
    }

    /// Capability layers, most-derived first.
    #[must_use]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Member lookup: own members first, then layer methods in chain order.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Node> {
        self.members
            .iter()
            .find(|(member, _)| member == name)
            .map(|(_, node)| node.clone())
            .or_else(|| {
                self.layers.iter().find_map(|layer| {
                    layer
                        .methods
                        .iter()
                        .find(|(method, _)| method == name)
                        .map(|(_, function)| Node::Function(function.clone()))
                })
            })
    }

    /// Custom handler for `method`, if declared.
    #[must_use]
    pub fn handler(&self, method: &Method) -> Option<&MethodHandler> {
        self.handlers
            .iter()
            .find(|(declared, _)| declared == method)
            .map(|(_, handler)| handler)
    }
}

impl fmt::Debug for Description {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Description")
            .field(
                "members",
                &self.members.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .field("layers", &self.layers)
            .field(
                "handlers",
                &self.handlers.iter().map(|(m, _)| m).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// An object whose members can be reached over the protocol.
///
/// `describe` is called on every request that touches the object, so it
/// should build the description from current state.
pub trait Exposed: Send + Sync {
    /// Type-name chain, most-derived first.
    fn type_names(&self) -> Vec<String> {
        vec![short_type_name(std::any::type_name::<Self>()).to_string()]
    }

    /// Describe current members.
    fn describe(self: Arc<Self>) -> Description;
}
