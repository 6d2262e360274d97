use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl VarValue {
    pub fn kind(&self) -> VarKind {
        match self {
            VarValue::Int(_) => VarKind::Int,
            VarValue::Float(_) => VarKind::Float,
            VarValue::Bool(_) => VarKind::Bool,
            VarValue::Text(_) => VarKind::Text,
        }
    }
}

impl From<i64> for VarValue {
    fn from(value: i64) -> Self {
        VarValue::Int(value)
    }
}

impl From<f64> for VarValue {
    fn from(value: f64) -> Self {
        VarValue::Float(value)
    }
}

impl From<bool> for VarValue {
    fn from(value: bool) -> Self {
        VarValue::Bool(value)
    }
}

impl From<&str> for VarValue {
    fn from(value: &str) -> Self {
        VarValue::Text(value.to_string())
    }
}

impl From<String> for VarValue {
    fn from(value: String) -> Self {
        VarValue::Text(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Int,
    Float,
    Bool,
    Text,
}

impl fmt::Display for VarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VarKind::Int => "int",
            VarKind::Float => "float",
            VarKind::Bool => "bool",
            VarKind::Text => "text",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VarError {
    #[error("game variable '{name}' is not defined")]
    Unknown { name: String },
    #[error("game variable '{name}' is already defined")]
    AlreadyDefined { name: String },
    #[error("game variable '{name}' holds {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: VarKind,
        actual: VarKind,
    },
}

type Listener = Box<dyn FnMut(&VarValue, &VarValue)>;

/// Named, typed game state with change listeners.
///
/// A variable's kind is fixed when it is defined. Listeners fire with
/// `(previous, current)` only when a write actually changes the value.
#[derive(Default)]
pub struct GameVars {
    values: BTreeMap<String, VarValue>,
    listeners: HashMap<String, Vec<Listener>>,
}

impl GameVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: &str, value: impl Into<VarValue>) -> Result<(), VarError> {
        if self.values.contains_key(name) {
            return Err(VarError::AlreadyDefined {
                name: name.to_string(),
            });
        }
        self.values.insert(name.to_string(), value.into());
        Ok(())
    }

    pub fn set(&mut self, name: &str, value: impl Into<VarValue>) -> Result<(), VarError> {
        let value = value.into();
        let current = self.lookup(name)?;
        if current.kind() != value.kind() {
            return Err(VarError::TypeMismatch {
                name: name.to_string(),
                expected: current.kind(),
                actual: value.kind(),
            });
        }
        if *current == value {
            return Ok(());
        }
        let previous = self
            .values
            .insert(name.to_string(), value.clone())
            .unwrap_or_else(|| value.clone());
        debug!(var = name, ?previous, current = ?value, "game_var_changed");
        if let Some(listeners) = self.listeners.get_mut(name) {
            for listener in listeners.iter_mut() {
                listener(&previous, &value);
            }
        }
        Ok(())
    }

    /// Adds `delta` to an `Int` or `Float` variable. An `Int` only takes a
    /// whole, finite `delta`; anything else is a `TypeMismatch`.
    pub fn increment(&mut self, name: &str, delta: f64) -> Result<(), VarError> {
        let next = match self.lookup(name)? {
            VarValue::Int(_) if !delta.is_finite() || delta.fract() != 0.0 => {
                return Err(VarError::TypeMismatch {
                    name: name.to_string(),
                    expected: VarKind::Int,
                    actual: VarKind::Float,
                })
            }
            VarValue::Int(value) => VarValue::Int(value.saturating_add(delta as i64)),
            VarValue::Float(value) => VarValue::Float(value + delta),
            other => {
                return Err(VarError::TypeMismatch {
                    name: name.to_string(),
                    expected: other.kind(),
                    actual: VarKind::Float,
                })
            }
        };
        self.set(name, next)
    }

    /// Integer-only `increment`.
    pub fn increment_int(&mut self, name: &str, delta: i64) -> Result<(), VarError> {
        match self.lookup(name)? {
            VarValue::Int(value) => {
                let next = value.saturating_add(delta);
                self.set(name, next)
            }
            other => Err(mismatch(name, VarKind::Int, other)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&VarValue> {
        self.values.get(name)
    }

    pub fn get_int(&self, name: &str) -> Result<i64, VarError> {
        match self.lookup(name)? {
            VarValue::Int(value) => Ok(*value),
            other => Err(mismatch(name, VarKind::Int, other)),
        }
    }

    pub fn get_float(&self, name: &str) -> Result<f64, VarError> {
        match self.lookup(name)? {
            VarValue::Float(value) => Ok(*value),
            other => Err(mismatch(name, VarKind::Float, other)),
        }
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, VarError> {
        match self.lookup(name)? {
            VarValue::Bool(value) => Ok(*value),
            other => Err(mismatch(name, VarKind::Bool, other)),
        }
    }

    pub fn get_text(&self, name: &str) -> Result<&str, VarError> {
        match self.lookup(name)? {
            VarValue::Text(value) => Ok(value.as_str()),
            other => Err(mismatch(name, VarKind::Text, other)),
        }
    }

    pub fn on_change<F>(&mut self, name: &str, listener: F) -> Result<(), VarError>
    where
        F: FnMut(&VarValue, &VarValue) + 'static,
    {
        self.lookup(name)?;
        self.listeners
            .entry(name.to_string())
            .or_default()
            .push(Box::new(listener));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drops every variable and listener; used before a new game starts.
    pub fn clear(&mut self) {
        self.values.clear();
        self.listeners.clear();
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.values).unwrap_or(serde_json::Value::Null)
    }

    fn lookup(&self, name: &str) -> Result<&VarValue, VarError> {
        self.values.get(name).ok_or_else(|| VarError::Unknown {
            name: name.to_string(),
        })
    }
}

fn mismatch(name: &str, expected: VarKind, actual: &VarValue) -> VarError {
    VarError::TypeMismatch {
        name: name.to_string(),
        expected,
        actual: actual.kind(),
    }
}

impl fmt::Debug for GameVars {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameVars")
            .field("values", &self.values)
            .field(
                "listeners",
                &self.listeners.values().map(Vec::len).sum::<usize>(),
            )
            .finish()
    }
}
