//! Host configuration assembled from the environment.
//!
//! - `SVCHOST_CONFIG`: path to a JSON file used as the starting document
//! - `SVCHOST_LISTEN`: served service (default `EchoHost`)
//! - `SVCHOST_GREETING`: `echo.greeting`
//! - `SVCHOST_AUTH_REALM`: realm for both auth schemes
//! - `SVCHOST_BASIC_USERS`: `user:bcrypt-hash` pairs, comma separated
//! - `SVCHOST_BEARER_TOKENS`: `token=user` pairs, comma separated

use anyhow::{Context, bail};
use serde_json::{Map, Value, json};

/// Service served when nothing else is configured.
pub const DEFAULT_LISTEN: &str = "EchoHost";

/// Build the host configuration from process environment variables.
pub fn from_env() -> anyhow::Result<Value> {
    build(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
}

/// Build the host configuration from `lookup`.
pub fn build(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Value> {
    let mut config = match lookup("SVCHOST_CONFIG") {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {path}"))?;
            serde_json::from_str::<Value>(&raw)
                .with_context(|| format!("Config file {path} is not valid JSON"))?
        }
        None => json!({}),
    };
    let Some(root) = config.as_object_mut() else {
        bail!("Host configuration must be a JSON object");
    };

    if let Some(listen) = lookup("SVCHOST_LISTEN") {
        root.insert("listen".to_string(), Value::String(listen));
    }
    root.entry("listen")
        .or_insert_with(|| Value::String(DEFAULT_LISTEN.to_string()));

    if let Some(greeting) = lookup("SVCHOST_GREETING") {
        section(root, "echo")?.insert("greeting".to_string(), Value::String(greeting));
    }

    let realm = lookup("SVCHOST_AUTH_REALM");
    if let Some(users) = lookup("SVCHOST_BASIC_USERS") {
        let credentials = pairs(&users, ':')
            .map(|(username, password)| json!({"username": username, "password": password}))
            .collect::<Vec<_>>();
        if credentials.is_empty() {
            bail!("SVCHOST_BASIC_USERS must hold user:hash pairs");
        }
        let basic = auth_section(root, "basic")?;
        basic.insert("credentials".to_string(), Value::Array(credentials));
        if let Some(realm) = &realm {
            basic.insert("realm".to_string(), Value::String(realm.clone()));
        }
    }
    if let Some(tokens) = lookup("SVCHOST_BEARER_TOKENS") {
        let tokens = pairs(&tokens, '=')
            .map(|(token, user)| json!({"token": token, "user": user}))
            .collect::<Vec<_>>();
        if tokens.is_empty() {
            bail!("SVCHOST_BEARER_TOKENS must hold token=user pairs");
        }
        let bearer = auth_section(root, "bearer")?;
        bearer.insert("tokens".to_string(), Value::Array(tokens));
        if let Some(realm) = &realm {
            bearer.insert("realm".to_string(), Value::String(realm.clone()));
        }
    }

    Ok(config)
}

fn pairs(raw: &str, separator: char) -> impl Iterator<Item = (&str, &str)> {
    raw.split(',')
        .filter_map(move |pair| pair.trim().split_once(separator))
        .filter(|(left, right)| !left.is_empty() && !right.is_empty())
}

fn section<'a>(root: &'a mut Map<String, Value>, name: &str) -> anyhow::Result<&'a mut Map<String, Value>> {
    root.entry(name)
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .with_context(|| format!("`{name}` must be a JSON object"))
}

fn auth_section<'a>(
    root: &'a mut Map<String, Value>,
    scheme: &str,
) -> anyhow::Result<&'a mut Map<String, Value>> {
    section(section(root, "auth")?, scheme)
}
