//! Typed configuration shapes (§6) plus the generic `rooms.common` /
//! `rooms.<room>` deep-merge (§4.4) that produces them.
//!
//! The merge itself is deliberately untyped — it walks a raw [`toml::Table`]
//! the same way the originating merge policy does, because the merge rules
//! (concatenate `ignore_users`, concatenate string `prompt_vars`, override
//! wins otherwise) only make sense before the shape is known to be a
//! `CommandConfig` or a `ModeConfig`. Once merged, the table is deserialized
//! into the structs below, surfacing shape mistakes as a single
//! [`ConfigError`] rather than scattering `Option`/default handling through
//! every call site.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use toml::value::Table;
use toml::Value;

use crate::error::ConfigError;

/// An insertion-order-preserving map, used anywhere config order is
/// semantically meaningful (a mode's first-listed trigger is its default;
/// the classifier's first-listed label is its fallback).
///
/// `toml`/`serde_json` deserializers stream table/object entries in source
/// order rather than sorting them, so a hand-rolled `Visitor` that just
/// records entries as they arrive is enough to preserve that order without
/// pulling in an `indexmap` dependency.
#[derive(Debug, Clone)]
pub struct OrderedMap<V>(Vec<(String, V)>);

impl<V> OrderedMap<V> {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn first_key(&self) -> Option<&str> {
        self.0.first().map(|(k, _)| k.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OrderedMapVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((k, v)) = map.next_entry::<String, V>()? {
                    entries.push((k, v));
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

/// A model field that accepts either a single spec string or a list (the
/// first entry of which is the one actually used for prompt substitution and
/// help text).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ModelValue {
    Single(String),
    Multiple(Vec<String>),
}

impl ModelValue {
    /// The spec actually used when only one is needed (prompt substitution,
    /// help text, `{trigger}_model` placeholders).
    pub fn primary(&self) -> &str {
        match self {
            ModelValue::Single(s) => s,
            ModelValue::Multiple(list) => list.first().map(String::as_str).unwrap_or(""),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_response_max_bytes() -> usize {
    600
}

fn default_mode_policy() -> String {
    "classifier".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerOverrides {
    pub model: Option<ModelValue>,
    pub reasoning_effort: Option<String>,
    pub allowed_tools: Option<Vec<String>>,
    pub steering: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModeConfig {
    pub prompt: String,
    pub model: ModelValue,
    pub history_size: Option<u32>,
    pub reasoning_effort: Option<String>,
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub steering: bool,
    #[serde(default)]
    pub auto_reduce_context: Option<bool>,
    #[serde(default)]
    pub include_chapter_summary: Option<bool>,
    pub triggers: OrderedMap<TriggerOverrides>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModeClassifierConfig {
    pub model: String,
    pub prompt: String,
    pub labels: OrderedMap<String>,
    pub fallback_label: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    pub history_size: u32,
    pub rate_limit: usize,
    pub rate_period: u64,
    #[serde(default = "default_response_max_bytes")]
    pub response_max_bytes: usize,
    #[serde(default)]
    pub debounce: f64,
    #[serde(default)]
    pub ignore_users: Vec<String>,
    #[serde(default = "default_mode_policy")]
    pub default_mode: String,
    #[serde(default)]
    pub channel_modes: HashMap<String, String>,
    pub mode_classifier: ModeClassifierConfig,
    pub modes: OrderedMap<ModeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProactiveModels {
    pub validation: Vec<String>,
    pub serious: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProactivePrompts {
    pub interject: String,
    pub serious_extra: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProactiveConfig {
    pub rate_limit: usize,
    pub rate_period: u64,
    pub debounce_seconds: f64,
    pub history_size: u32,
    pub interject_threshold: u32,
    #[serde(default)]
    pub interjecting: Vec<String>,
    #[serde(default)]
    pub interjecting_test: Vec<String>,
    pub models: ProactiveModels,
    pub prompts: ProactivePrompts,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BehaviorConfig {
    #[serde(default)]
    pub proactive_interjecting_test: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomConfig {
    pub command: CommandConfig,
    pub proactive: ProactiveConfig,
    #[serde(default)]
    pub prompt_vars: HashMap<String, String>,
    #[serde(default)]
    pub behavior: BehaviorConfig,
}

impl RoomConfig {
    /// Parse an already-merged `rooms.common` + `rooms.<room>` table into a
    /// typed config, surfacing any shape mismatch as a [`ConfigError`].
    pub fn from_merged_table(table: Table) -> Result<RoomConfig, ConfigError> {
        Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Deserialize(e.to_string()))
    }
}

fn table_at(table: &Table, key: &str) -> Table {
    match table.get(key) {
        Some(Value::Table(t)) => t.clone(),
        _ => Table::new(),
    }
}

/// Deep-merge `override_` onto `base`, per §4.4's policy:
/// - plain keys: override wins.
/// - `ignore_users` (array): concatenated, base first then override.
/// - `prompt_vars` (table): per-key; string+string concatenates, else override wins.
/// - nested tables: recursive merge with the same rules.
/// - arrays (other than `ignore_users`): override wins, copied.
pub fn deep_merge_config(base: &Table, override_: &Table) -> Table {
    let mut result = Table::new();

    for (key, value) in base {
        let copied = match value {
            Value::Table(t) => Value::Table(deep_merge_config(t, &Table::new())),
            Value::Array(a) => Value::Array(a.clone()),
            other => other.clone(),
        };
        result.insert(key.clone(), copied);
    }

    for (key, value) in override_ {
        if key == "ignore_users" {
            if let Value::Array(over_arr) = value {
                let mut merged = match result.get(key) {
                    Some(Value::Array(base_arr)) => base_arr.clone(),
                    _ => Vec::new(),
                };
                merged.extend(over_arr.clone());
                result.insert(key.clone(), Value::Array(merged));
                continue;
            }
        }

        if key == "prompt_vars" {
            if let Value::Table(over_vars) = value {
                let mut merged_vars = match result.get(key) {
                    Some(Value::Table(base_vars)) => base_vars.clone(),
                    _ => Table::new(),
                };
                for (var_key, var_value) in over_vars {
                    let combined = match (merged_vars.get(var_key), var_value) {
                        (Some(Value::String(existing)), Value::String(addition)) => {
                            Value::String(format!("{existing}{addition}"))
                        }
                        _ => var_value.clone(),
                    };
                    merged_vars.insert(var_key.clone(), combined);
                }
                result.insert(key.clone(), Value::Table(merged_vars));
                continue;
            }
        }

        match (value, result.get(key)) {
            (Value::Table(over_table), Some(Value::Table(base_table))) => {
                result.insert(key.clone(), Value::Table(deep_merge_config(base_table, over_table)));
            }
            (Value::Array(arr), _) => {
                result.insert(key.clone(), Value::Array(arr.clone()));
            }
            _ => {
                result.insert(key.clone(), value.clone());
            }
        }
    }

    result
}

/// Merge `rooms.common` with `rooms.<room_name>` from a full parsed config
/// table, returning the merged (still untyped) room table.
pub fn get_room_config(config: &Table, room_name: &str) -> Table {
    let rooms = table_at(config, "rooms");
    let common = table_at(&rooms, "common");
    let room = table_at(&rooms, room_name);
    deep_merge_config(&common, &room)
}
