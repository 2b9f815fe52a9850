use serde_json::{Map, Value};

use crate::error::{AlgebrasError, Result};
use super::{DocumentProjection, DocumentRole, FormatHandler, KeyPath, StructureHandle};

/// Nested JSON objects flattened to key paths. Non-string leaves are ignored.
pub struct JsonHandler;

impl JsonHandler {
    pub fn new() -> Self {
        Self
    }

    fn flatten(prefix: &KeyPath, value: &Value, out: &mut DocumentProjection) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    Self::flatten(&prefix.child(key.clone()), child, out);
                }
            }
            Value::Array(items) => {
                for (idx, child) in items.iter().enumerate() {
                    Self::flatten(&prefix.child(idx.to_string()), child, out);
                }
            }
            Value::String(text) => out.insert(prefix.clone(), text.clone()),
            _ => {}
        }
    }

    fn insert_nested(root: &mut Map<String, Value>, segments: &[String], value: &str) {
        let Some((last, parents)) = segments.split_last() else {
            return;
        };

        let mut current = root;
        for segment in parents {
            let slot = current
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            let Value::Object(map) = slot else {
                return;
            };
            current = map;
        }
        current.insert(last.clone(), Value::String(value.to_string()));
    }

    /// Turn objects whose keys are exactly `0..n` back into arrays.
    fn restore_arrays(value: Value) -> Value {
        let Value::Object(map) = value else {
            return value;
        };

        let len = map.len();
        let is_array = len > 0
            && map.keys().all(|key| {
                key.parse::<usize>()
                    .is_ok_and(|idx| idx < len && idx.to_string() == *key)
            });

        if is_array {
            let mut items = vec![Value::Null; len];
            for (key, child) in map {
                if let Ok(idx) = key.parse::<usize>() {
                    items[idx] = Self::restore_arrays(child);
                }
            }
            Value::Array(items)
        } else {
            Value::Object(
                map.into_iter()
                    .map(|(key, child)| (key, Self::restore_arrays(child)))
                    .collect(),
            )
        }
    }
}

impl Default for JsonHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatHandler for JsonHandler {
    fn name(&self) -> &'static str {
        "json"
    }

    fn supports_in_place_merge(&self) -> bool {
        false
    }

    fn parse(&self, content: &str, _role: DocumentRole) -> Result<DocumentProjection> {
        let mut projection = DocumentProjection::new(StructureHandle::from_text(content));
        if content.trim().is_empty() {
            return Ok(projection);
        }

        let value: Value = serde_json::from_str(content)
            .map_err(|e| AlgebrasError::format("json", "<input>", e.to_string()))?;
        if !value.is_object() {
            return Err(AlgebrasError::format("json", "<input>", "top-level value must be an object"));
        }

        Self::flatten(&KeyPath::new(Vec::<String>::new()), &value, &mut projection);
        Ok(projection)
    }

    fn render(&self, entries: &[(KeyPath, String)]) -> Result<String> {
        let mut root = Map::new();
        for (key, value) in entries {
            Self::insert_nested(&mut root, key.segments(), value);
        }

        let mut rendered = match Self::restore_arrays(Value::Object(root)) {
            Value::Array(items) => {
                // The document root stays an object even with index-like keys
                let root: Map<String, Value> = items
                    .into_iter()
                    .enumerate()
                    .map(|(idx, item)| (idx.to_string(), item))
                    .collect();
                serde_json::to_string_pretty(&Value::Object(root))?
            }
            value => serde_json::to_string_pretty(&value)?,
        };
        rendered.push('\n');
        Ok(rendered)
    }
}
