//! Services hosted by the demo.
//!
//! ```text
//! SystemClock ◄── NoteBoard ◄── EchoHost   (served)
//!      ▲                           │
//!      └───────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::{Arc, PoisonError, RwLock};
use svchost_core::{
    Dependencies, Description, Exposed, Function, HookFuture, HostError, Layer, Node, Result,
    Service, ServiceConfig, ServiceFactory, factory,
};
use tokio::sync::Notify;

/// Default greeting when `echo.greeting` is not configured.
pub const DEFAULT_GREETING: &str = "hello from svchost";

// ═══════════════════════════════════════════════════════════════════════
// SystemClock
// ═══════════════════════════════════════════════════════════════════════

/// Wall clock shared by the other services.
#[derive(Debug)]
pub struct SystemClock {
    started: DateTime<Utc>,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Utc::now(),
        }
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    #[must_use]
    pub const fn started(&self) -> DateTime<Utc> {
        self.started
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Service for SystemClock {}

// ═══════════════════════════════════════════════════════════════════════
// NoteBoard
// ═══════════════════════════════════════════════════════════════════════

/// One posted note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Replacement body accepted by `PUT /notes`.
#[derive(Debug, Deserialize)]
struct Replace {
    items: Vec<String>,
}

/// In-memory list of notes, with a change signal for observers.
#[derive(Debug)]
pub struct NoteBoard {
    clock: Arc<SystemClock>,
    notes: RwLock<Vec<Note>>,
    changed: Notify,
}

impl NoteBoard {
    #[must_use]
    pub fn new(clock: Arc<SystemClock>) -> Self {
        Self {
            clock,
            notes: RwLock::new(Vec::new()),
            changed: Notify::new(),
        }
    }

    /// Factory depending on [`SystemClock`].
    pub fn factory() -> impl ServiceFactory<Service = Self> {
        factory(&["SystemClock"], |deps: Dependencies| {
            Ok(Arc::new(Self::new(deps.get::<SystemClock>("SystemClock")?)))
        })
    }

    /// Append a note, returning the new note count.
    ///
    /// # Errors
    ///
    /// HTTP 400 for blank text.
    pub fn post(&self, text: &str) -> Result<usize> {
        let text = text.trim();
        if text.is_empty() {
            return Err(HostError::http_with_message(400, "note text must not be empty"));
        }

        let count = {
            let mut notes = self.notes.write().unwrap_or_else(PoisonError::into_inner);
            notes.push(Note {
                text: text.to_string(),
                at: self.clock.now(),
            });
            notes.len()
        };
        self.changed.notify_waiters();
        tracing::debug!(count, "Note posted");
        Ok(count)
    }

    /// Replace every note.
    pub fn replace(&self, texts: Vec<String>) {
        let at = self.clock.now();
        *self.notes.write().unwrap_or_else(PoisonError::into_inner) = texts
            .into_iter()
            .map(|text| Note { text, at })
            .collect();
        self.changed.notify_waiters();
    }

    /// Remove every note, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let dropped = std::mem::take(&mut *self.notes.write().unwrap_or_else(PoisonError::into_inner))
            .len();
        self.changed.notify_waiters();
        dropped
    }

    #[must_use]
    pub fn notes(&self) -> Vec<Note> {
        self.notes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolves on the next change.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }
}

impl Service for NoteBoard {
    fn exposed(self: Arc<Self>) -> Option<Arc<dyn Exposed>> {
        Some(self)
    }
}

impl Exposed for NoteBoard {
    fn type_names(&self) -> Vec<String> {
        vec!["NoteBoard".to_string()]
    }

    fn describe(self: Arc<Self>) -> Description {
        let notes = self.notes();
        let post = Arc::clone(&self);
        let clear = Arc::clone(&self);
        let put = Arc::clone(&self);

        Description::new()
            .data("count", notes.len())
            .member(
                "items",
                Node::from_serialize(&notes).unwrap_or(Node::Data(Value::Array(Vec::new()))),
            )
            .method(
                "post",
                Function::sync(&["text"], move |args| {
                    let text = args.first().and_then(Value::as_str).ok_or_else(|| {
                        HostError::http_with_message(400, "text must be a string")
                    })?;
                    Ok(Node::Data(json!(post.post(text)?)))
                })
                .with_property("description", json!("Append a note and return the count")),
            )
            .method(
                "clear",
                Function::sync(&[], move |_| Ok(Node::Data(json!(clear.clear())))),
            )
            .on_method(http::Method::PUT, move |ctx| {
                let board = Arc::clone(&put);
                async move {
                    let body = ctx
                        .json_body()
                        .await?
                        .ok_or_else(|| HostError::http_with_message(400, "body is required"))?;
                    let replace: Replace = serde_json::from_value(body).map_err(|e| {
                        HostError::http_with_message(400, format!("invalid notes: {e}"))
                    })?;
                    board.replace(replace.items);
                    Ok::<_, HostError>(Node::Data(json!(board.notes().len())))
                }
            })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// EchoHost
// ═══════════════════════════════════════════════════════════════════════

/// The served root: a greeting, the note board and a few callables.
#[derive(Debug)]
pub struct EchoHost {
    clock: Arc<SystemClock>,
    board: Arc<NoteBoard>,
    greeting: RwLock<String>,
}

/// `echo` section of the host configuration.
#[derive(Debug, Default, Deserialize)]
struct EchoSection {
    greeting: Option<String>,
}

impl EchoHost {
    #[must_use]
    pub fn new(clock: Arc<SystemClock>, board: Arc<NoteBoard>) -> Self {
        Self {
            clock,
            board,
            greeting: RwLock::new(DEFAULT_GREETING.to_string()),
        }
    }

    /// Factory depending on [`SystemClock`] and [`NoteBoard`].
    pub fn factory() -> impl ServiceFactory<Service = Self> {
        factory(&["SystemClock", "NoteBoard"], |deps: Dependencies| {
            Ok(Arc::new(Self::new(
                deps.get::<SystemClock>("SystemClock")?,
                deps.get::<NoteBoard>("NoteBoard")?,
            )))
        })
    }

    #[must_use]
    pub fn greeting(&self) -> String {
        self.greeting
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Service for EchoHost {
    fn on_config<'a>(&'a self, config: &'a ServiceConfig) -> Option<HookFuture<'a>> {
        Some(Box::pin(async move {
            let section = match config.get("echo") {
                Some(section) => serde_json::from_value::<EchoSection>(section.clone())
                    .map_err(|e| HostError::Validation(format!("echo section: {e}")))?,
                None => EchoSection::default(),
            };
            if let Some(greeting) = section.greeting {
                *self.greeting.write().unwrap_or_else(PoisonError::into_inner) = greeting;
            }
            Ok(())
        }))
    }

    fn on_run(&self) -> Option<HookFuture<'_>> {
        Some(Box::pin(async move {
            tracing::info!(greeting = %self.greeting(), "Echo host ready");
            Ok(())
        }))
    }

    fn exposed(self: Arc<Self>) -> Option<Arc<dyn Exposed>> {
        Some(self)
    }
}

impl Exposed for EchoHost {
    fn type_names(&self) -> Vec<String> {
        vec!["EchoHost".to_string(), "Pingable".to_string()]
    }

    fn describe(self: Arc<Self>) -> Description {
        let clock = Arc::clone(&self.clock);
        let board = Arc::clone(&self.board);

        Description::new()
            .data("greeting", self.greeting())
            .date("started", self.clock.started())
            .object("notes", Arc::clone(&self.board) as Arc<dyn Exposed>)
            .method(
                "echo",
                Function::sync(&["value"], |args| {
                    Ok(args.into_iter().next().map_or(Node::Undefined, Node::Data))
                })
                .with_property("description", json!("Returns its argument")),
            )
            .method(
                "time",
                Function::sync(&[], move |_| Ok(Node::Date(clock.now()))),
            )
            .method(
                "waitForNote",
                Function::new(&["seconds"], move |args| {
                    let board = Arc::clone(&board);
                    async move {
                        let seconds = args.first().and_then(Value::as_f64).unwrap_or(30.0);
                        let limit = std::time::Duration::try_from_secs_f64(seconds).map_err(|e| {
                            HostError::http_with_message(400, format!("seconds: {e}"))
                        })?;
                        match tokio::time::timeout(limit, board.changed()).await {
                            Ok(()) => Ok(Node::from_serialize(&board.notes().last())?),
                            Err(_) => Ok(Node::Undefined),
                        }
                    }
                }),
            )
            .layer(Layer::new("Pingable").method(
                "ping",
                Function::sync(&[], |_| Ok(Node::Data(json!("pong")))),
            ))
    }
}
