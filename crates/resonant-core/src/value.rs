#![forbid(unsafe_code)]

//! Dynamic values held by a store.
//!
//! [`Value`] is the in-process, JSON-compatible value model. Primitives are
//! held inline; objects and arrays are shared handles
//! ([`ObservableObject`], [`ObservableArray`]) that compare by identity, the
//! same way the rest of the engine reasons about "the same object".
//!
//! Converting from [`serde_json::Value`] is shallow: the top-level container
//! becomes a handle, and anything nested stays in raw JSON form until first
//! read (wrap-on-read).

use std::fmt;

use ahash::AHashSet;

use crate::array::ObservableArray;
use crate::binding::Binding;
use crate::error::ValueError;
use crate::object::ObservableObject;
use crate::path;

/// A value stored in a root variable, a property, or an array slot.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Object(ObservableObject),
    Array(ObservableArray),
}

impl Value {
    /// Shallow conversion from JSON. Nested containers stay raw.
    #[must_use]
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => Self::Array(ObservableArray::from_json_items(items)),
            serde_json::Value::Object(map) => Self::Object(ObservableObject::from_json_map(map)),
        }
    }

    /// Identity comparison: containers by reference, primitives by value.
    ///
    /// `NaN` is never the same as anything, matching strict equality.
    #[must_use]
    pub fn is_same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Array(a), Self::Array(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Object(_) | Self::Array(_))
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&ObservableObject> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&ObservableArray> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Truthiness with the usual scripting rules: `null`, `false`, `0`,
    /// `NaN` and `""` are falsy; every container is truthy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::Object(_) | Self::Array(_) => true,
        }
    }

    /// Deep JSON snapshot. Fails on cyclic graphs.
    pub fn to_json(&self) -> Result<serde_json::Value, ValueError> {
        let mut stack = AHashSet::new();
        self.to_json_inner("", &mut stack)
    }

    pub(crate) fn to_json_inner(
        &self,
        at: &str,
        stack: &mut AHashSet<usize>,
    ) -> Result<serde_json::Value, ValueError> {
        match self {
            Self::Null => Ok(serde_json::Value::Null),
            Self::Bool(b) => Ok(serde_json::Value::Bool(*b)),
            Self::Number(n) => Ok(number_to_json(*n)),
            Self::String(s) => Ok(serde_json::Value::String(s.clone())),
            Self::Object(o) => o.to_json_inner(at, stack),
            Self::Array(a) => a.to_json_inner(at, stack),
        }
    }

    /// Text used when the value is written into a content node.
    ///
    /// `null` renders as an empty string; containers render as compact JSON.
    #[must_use]
    pub fn display_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Object(_) | Self::Array(_) => self
                .to_json()
                .map(|json| json.to_string())
                .unwrap_or_default(),
            other => other.to_string(),
        }
    }

    pub(crate) fn addr(&self) -> Option<usize> {
        match self {
            Self::Object(o) => Some(o.addr()),
            Self::Array(a) => Some(a.addr()),
            _ => None,
        }
    }
}

/// Convert an `f64` to JSON, keeping integral values integral.
#[must_use]
pub fn number_to_json(n: f64) -> serde_json::Value {
    const MAX_SAFE: f64 = 9_007_199_254_740_991.0;
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.is_same(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
            Self::Object(_) | Self::Array(_) => match self.to_json() {
                Ok(json) => write!(f, "{json}"),
                Err(_) => f.write_str("[cyclic]"),
            },
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Self::from_json(json)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

macro_rules! impl_from_number {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(n: $t) -> Self {
                    Self::Number(n as f64)
                }
            }
        )*
    };
}

impl_from_number!(f64, f32, i32, i64, u32, u64, usize);

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<ObservableObject> for Value {
    fn from(o: ObservableObject) -> Self {
        Self::Object(o)
    }
}

impl From<ObservableArray> for Value {
    fn from(a: ObservableArray) -> Self {
        Self::Array(a)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::Array(ObservableArray::from_values(items))
    }
}

// ---------------------------------------------------------------------------
// Slot: a container cell that may still hold raw JSON
// ---------------------------------------------------------------------------

/// Storage cell inside an object or array.
///
/// `Raw` only ever holds a JSON object or array that has not been read yet.
#[derive(Clone, Debug)]
pub(crate) enum Slot {
    Raw(serde_json::Value),
    Live(Value),
}

impl Slot {
    pub(crate) fn from_json(json: serde_json::Value) -> Self {
        match json {
            json @ (serde_json::Value::Object(_) | serde_json::Value::Array(_)) => Self::Raw(json),
            other => Self::Live(Value::from_json(other)),
        }
    }

    /// Wrap a raw cell on first read and cache the handle in place.
    pub(crate) fn materialize(&mut self, binding: Option<&Binding>) -> Value {
        match self {
            Self::Live(v) => v.clone(),
            Self::Raw(json) => {
                let value = Value::from_json(std::mem::take(json));
                let value = match binding {
                    Some(b) => crate::binding::attach(value, b),
                    None => value,
                };
                *self = Self::Live(value.clone());
                value
            }
        }
    }

    /// Read without caching. Raw cells yield a detached copy.
    pub(crate) fn peek(&self) -> Value {
        match self {
            Self::Live(v) => v.clone(),
            Self::Raw(json) => Value::from_json(json.clone()),
        }
    }

    pub(crate) fn into_value(self) -> Value {
        match self {
            Self::Live(v) => v,
            Self::Raw(json) => Value::from_json(json),
        }
    }

    pub(crate) fn live(&self) -> Option<&Value> {
        match self {
            Self::Live(v) => Some(v),
            Self::Raw(_) => None,
        }
    }

    pub(crate) fn to_json_inner(
        &self,
        at: &str,
        stack: &mut AHashSet<usize>,
    ) -> Result<serde_json::Value, ValueError> {
        match self {
            Self::Raw(json) => Ok(json.clone()),
            Self::Live(v) => v.to_json_inner(at, stack),
        }
    }
}

/// Push `addr` onto the in-progress set, failing if it is already there.
pub(crate) fn enter(
    stack: &mut AHashSet<usize>,
    addr: usize,
    at: &str,
) -> Result<(), ValueError> {
    if stack.insert(addr) {
        Ok(())
    } else {
        Err(ValueError::Cycle {
            path: at.to_owned(),
        })
    }
}

pub(crate) fn child_path(at: &str, segment: &str) -> String {
    path::join(at, segment)
}
