//! Structural value codec.
//!
//! Values are written as canonical JSON text: object keys are sorted at every
//! level so structurally equal inputs always produce the same bytes. Custom
//! types are handled by [`TypeHook`]s. A hook inspects a JSON node and, when it
//! recognises the shape, replaces it with `{"$t": <name>, "v": <payload>}`;
//! decoding routes the payload back through the hook of the same name.

use crate::error::RemoteError;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{trace, warn};

/// Object key marking a hook-encoded node
pub const TYPE_TAG: &str = "$t";
/// Object key holding a hook-encoded payload
pub const TYPE_VALUE: &str = "v";

pub type EncodeFn = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;
pub type DecodeFn = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// Encoder/decoder pair for one custom type
#[derive(Clone)]
pub struct TypeHook {
    name: String,
    encode: EncodeFn,
    decode: DecodeFn,
}

impl TypeHook {
    pub fn new<E, D>(name: impl Into<String>, encode: E, decode: D) -> Self
    where
        E: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
        D: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            encode: Arc::new(encode),
            decode: Arc::new(decode),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for TypeHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeHook").field("name", &self.name).finish()
    }
}

/// The set of custom type hooks shared by argument encoding and refresh decoding
#[derive(Debug, Clone, Default)]
pub struct Codec {
    hooks: Vec<TypeHook>,
}

impl Codec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook. Hooks are tried in registration order.
    pub fn with_hook(mut self, hook: TypeHook) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn hooks(&self) -> &[TypeHook] {
        &self.hooks
    }

    /// Serialize `value` to canonical text
    pub fn stringify<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, RemoteError> {
        let value = serde_json::to_value(value)
            .map_err(|e| RemoteError::encoding(format!("Unsupported value: {}", e)))?;
        self.stringify_value(&value)
    }

    pub fn stringify_value(&self, value: &Value) -> Result<String, RemoteError> {
        let reduced = self.reduce(value)?;
        let mut out = String::new();
        write_canonical(&reduced, &mut out)?;
        Ok(out)
    }

    /// Parse canonical text back into a value, reviving custom types
    pub fn parse(&self, text: &str) -> Result<Value, RemoteError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| RemoteError::encoding(format!("Malformed encoded value: {}", e)))?;
        self.revive(value)
    }

    /// Parse an encoded object, keeping its keys in the order they were written
    pub fn parse_map(&self, text: &str) -> Result<IndexMap<String, Value>, RemoteError> {
        let entries: IndexMap<String, Value> = serde_json::from_str(text)
            .map_err(|e| RemoteError::encoding(format!("Malformed encoded map: {}", e)))?;
        entries
            .into_iter()
            .map(|(key, value)| Ok((key, self.revive(value)?)))
            .collect()
    }

    fn reduce(&self, value: &Value) -> Result<Value, RemoteError> {
        for hook in &self.hooks {
            if let Some(payload) = (hook.encode)(value) {
                trace!("Encoding custom type {}", hook.name);
                let mut tagged = Map::new();
                tagged.insert(TYPE_TAG.to_string(), Value::String(hook.name.clone()));
                tagged.insert(TYPE_VALUE.to_string(), self.reduce_children(&payload)?);
                return Ok(Value::Object(tagged));
            }
        }
        self.reduce_children(value)
    }

    // A hook's own payload is not offered back to the hooks, only its children.
    fn reduce_children(&self, value: &Value) -> Result<Value, RemoteError> {
        match value {
            Value::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|item| self.reduce(item))
                    .collect::<Result<_, _>>()?,
            )),
            Value::Object(fields) => {
                if fields.contains_key(TYPE_TAG) {
                    return Err(RemoteError::encoding(format!(
                        "Object key {:?} is reserved for custom types",
                        TYPE_TAG
                    )));
                }
                let mut reduced = Map::new();
                for (key, field) in fields {
                    reduced.insert(key.clone(), self.reduce(field)?);
                }
                Ok(Value::Object(reduced))
            }
            other => Ok(other.clone()),
        }
    }

    fn revive(&self, value: Value) -> Result<Value, RemoteError> {
        match value {
            Value::Array(items) => Ok(Value::Array(
                items
                    .into_iter()
                    .map(|item| self.revive(item))
                    .collect::<Result<_, _>>()?,
            )),
            Value::Object(mut fields) => {
                if let Some(tag) = fields.remove(TYPE_TAG) {
                    let name = tag.as_str().ok_or_else(|| {
                        RemoteError::encoding("Custom type tag must be a string")
                    })?;
                    let hook = self
                        .hooks
                        .iter()
                        .find(|hook| hook.name == name)
                        .ok_or_else(|| {
                            warn!("No decoder registered for custom type {:?}", name);
                            RemoteError::encoding(format!("No decoder for custom type {:?}", name))
                        })?;
                    let payload = self.revive(fields.remove(TYPE_VALUE).unwrap_or(Value::Null))?;
                    return (hook.decode)(payload).map_err(|e| {
                        RemoteError::encoding(format!("Decoder {:?} failed: {}", name, e))
                    });
                }
                let mut revived = Map::new();
                for (key, field) in fields {
                    revived.insert(key, self.revive(field)?);
                }
                Ok(Value::Object(revived))
            }
            other => Ok(other),
        }
    }
}

fn write_canonical(value: &Value, out: &mut String) -> Result<(), RemoteError> {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        Value::Object(fields) => {
            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&scalar_text(&Value::String(key.clone()))?);
                out.push(':');
                if let Some(field) = fields.get(key) {
                    write_canonical(field, out)?;
                }
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar_text(scalar)?),
    }
    Ok(())
}

fn scalar_text(value: &Value) -> Result<String, RemoteError> {
    serde_json::to_string(value).map_err(|e| RemoteError::encoding(e.to_string()))
}
