//! Late-bound object model interface.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tunebridge_core::{BridgeError, BridgeResult, Handle, OperationGuard, Resource};

/// A dynamically typed value crossing the object-model boundary.
#[derive(Clone, Default)]
pub enum Variant {
    #[default]
    Empty,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Object(Arc<dyn AutomationObject>),
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Empty => f.write_str("Empty"),
            Variant::Bool(value) => f.debug_tuple("Bool").field(value).finish(),
            Variant::Int(value) => f.debug_tuple("Int").field(value).finish(),
            Variant::Float(value) => f.debug_tuple("Float").field(value).finish(),
            Variant::Text(value) => f.debug_tuple("Text").field(value).finish(),
            Variant::Object(_) => f.write_str("Object(..)"),
        }
    }
}

impl Variant {
    fn kind(&self) -> &'static str {
        match self {
            Variant::Empty => "empty",
            Variant::Bool(_) => "bool",
            Variant::Int(_) => "int",
            Variant::Float(_) => "float",
            Variant::Text(_) => "text",
            Variant::Object(_) => "object",
        }
    }

    fn mismatch(&self, expected: &str) -> BridgeError {
        BridgeError::decode(format!("expected {expected} value, got {}", self.kind()))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Variant::Empty)
    }

    pub fn as_bool(&self) -> BridgeResult<bool> {
        match self {
            Variant::Bool(value) => Ok(*value),
            other => Err(other.mismatch("bool")),
        }
    }

    pub fn as_int(&self) -> BridgeResult<i64> {
        match self {
            Variant::Int(value) => Ok(*value),
            other => Err(other.mismatch("int")),
        }
    }

    /// Floats, or ints widened to floats.
    pub fn as_float(&self) -> BridgeResult<f64> {
        match self {
            Variant::Float(value) => Ok(*value),
            Variant::Int(value) => Ok(*value as f64),
            other => Err(other.mismatch("float")),
        }
    }

    pub fn as_text(&self) -> BridgeResult<&str> {
        match self {
            Variant::Text(value) => Ok(value),
            other => Err(other.mismatch("text")),
        }
    }

    /// The object reference, `None` for an empty value.
    pub fn into_object(self) -> BridgeResult<Option<Arc<dyn AutomationObject>>> {
        match self {
            Variant::Object(object) => Ok(Some(object)),
            Variant::Empty => Ok(None),
            other => Err(other.mismatch("object")),
        }
    }

    /// A 32-bit half of a persistent id. Hosts report these as signed longs.
    pub fn as_id_half(&self) -> BridgeResult<u32> {
        let value = self.as_int()?;
        u32::try_from(value)
            .or_else(|_| i32::try_from(value).map(|v| v as u32))
            .map_err(|_| BridgeError::decode(format!("persistent id half {value} out of range")))
    }
}

/// One late-bound object exposed by the host's automation runtime.
///
/// Every object handed out through a property or method result is a new
/// reference the caller must [`release`](AutomationObject::release).
pub trait AutomationObject: Send + Sync {
    fn get_property(&self, name: &str, args: &[Variant]) -> BridgeResult<Variant>;

    fn put_property(&self, name: &str, value: Variant) -> BridgeResult<()>;

    fn call_method(&self, name: &str, args: &[Variant]) -> BridgeResult<Variant>;

    fn release(&self) -> BridgeResult<()>;
}

/// Handle resource wrapping an object reference.
pub(crate) struct ObjectRef {
    object: Arc<dyn AutomationObject>,
}

impl ObjectRef {
    pub(crate) fn resource(object: Arc<dyn AutomationObject>) -> Arc<dyn Resource> {
        Arc::new(Self { object })
    }
}

impl Resource for ObjectRef {
    fn release(&self) -> BridgeResult<()> {
        self.object.release()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Open a bracket on `handle` and borrow its object for the bracket's length.
pub(crate) fn enter(handle: &Handle) -> BridgeResult<(OperationGuard, Arc<dyn AutomationObject>)> {
    let guard = handle.acquire()?;
    let object = guard
        .resource()
        .and_then(|resource| {
            resource
                .as_any()
                .downcast_ref::<ObjectRef>()
                .map(|object_ref| object_ref.object.clone())
        })
        .ok_or_else(|| BridgeError::Closed {
            label: handle.label().to_string(),
        })?;
    Ok((guard, object))
}

/// An object reference released when dropped. Used for intermediate
/// collections that never get a handle of their own.
pub(crate) struct Scoped {
    object: Arc<dyn AutomationObject>,
}

impl Scoped {
    pub(crate) fn new(object: Arc<dyn AutomationObject>) -> Self {
        Self { object }
    }

    pub(crate) fn object(&self) -> &Arc<dyn AutomationObject> {
        &self.object
    }
}

impl Drop for Scoped {
    fn drop(&mut self) {
        if let Err(err) = self.object.release() {
            tracing::warn!(error = %err, "failed to release collection object");
        }
    }
}
