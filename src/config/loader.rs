//! Configuration loading and environment merging.

use std::path::Path;

use serde_json::Value;

use super::Config;

/// Load configuration with the following precedence (highest last):
/// 1) Compiled-in defaults
/// 2) File named by `RAMPART_CONFIG_PATH`, else `config.json` in the cwd
/// 3) `RAMPART__`-prefixed env overrides with `__` as the nesting separator,
///    e.g. `RAMPART__PORT=9000` or `RAMPART__LOGGING__FORMAT=json`
/// 4) The named deployment variables: `JWT_SECRET`, `INSTANCE_ID`,
///    `REDIS_ADDR/USERNAME/PASSWORD/DB/TLS`, `DB_HOST/USER/PASSWORD/NAME/PORT`
///
/// Loading never fails: unreadable or unparsable sources are reported on
/// stderr and skipped.
#[must_use]
pub fn load() -> Config {
    let defaults = Config::default();
    let mut merged =
        serde_json::to_value(&defaults).unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

    let path = std::env::var("RAMPART_CONFIG_PATH").unwrap_or_else(|_| "config.json".to_string());
    merge_file(&mut merged, Path::new(&path));

    apply_prefixed_env(&mut merged);
    apply_named_env(&mut merged);

    match serde_json::from_value::<Config>(merged) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to deserialize config; using defaults: {err}");
            defaults
        }
    }
}

fn merge_file(target: &mut Value, path: &Path) {
    if !path.exists() {
        return;
    }
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(value) => merge_values(target, value),
            Err(err) => eprintln!("Failed to parse config {}: {err}", path.display()),
        },
        Err(err) => eprintln!("Failed to read config {}: {err}", path.display()),
    }
}

fn merge_values(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, value) in source_map {
                match target_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        target_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn apply_prefixed_env(root: &mut Value) {
    for (key, raw) in std::env::vars() {
        let Some(stripped) = key.strip_prefix("RAMPART__") else {
            continue;
        };
        let segments: Vec<String> = stripped
            .split("__")
            .filter(|s| !s.is_empty())
            .map(str::to_ascii_lowercase)
            .collect();
        if segments.is_empty() {
            continue;
        }
        set_nested(root, &segments, parse_scalar(&raw));
    }
}

/// The §-named deployment variables map onto fixed config paths.
fn apply_named_env(root: &mut Value) {
    let mappings: [(&str, &[&str]); 12] = [
        ("JWT_SECRET", &["jwt_secret"]),
        ("INSTANCE_ID", &["instance_id"]),
        ("REDIS_ADDR", &["redis", "addr"]),
        ("REDIS_USERNAME", &["redis", "username"]),
        ("REDIS_PASSWORD", &["redis", "password"]),
        ("REDIS_DB", &["redis", "db"]),
        ("REDIS_TLS", &["redis", "tls"]),
        ("DB_HOST", &["database", "host"]),
        ("DB_USER", &["database", "user"]),
        ("DB_PASSWORD", &["database", "password"]),
        ("DB_NAME", &["database", "name"]),
        ("DB_PORT", &["database", "port"]),
    ];
    for (var, path) in mappings {
        if let Ok(raw) = std::env::var(var) {
            let segments: Vec<String> = path.iter().map(|s| (*s).to_string()).collect();
            set_nested(root, &segments, parse_scalar(&raw));
        }
    }
}

fn parse_scalar(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::String(String::new());
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

fn set_nested(target: &mut Value, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *target = value;
        return;
    };
    let map = match target {
        Value::Object(map) => map,
        other => {
            *other = Value::Object(serde_json::Map::new());
            match other {
                Value::Object(map) => map,
                _ => return,
            }
        }
    };
    if rest.is_empty() {
        map.insert(head.clone(), value);
        return;
    }
    let entry = map
        .entry(head.clone())
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    set_nested(entry, rest, value);
}
