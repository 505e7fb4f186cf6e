//! Runtime type handles and type-erased message payloads.
//!
//! Routing addresses are resolved at runtime, so the dispatch layer cannot name
//! concrete message types statically. `TypeHandle` is the runtime stand-in for a
//! type (identity, display name, and a JSON decoder), and `Payload` carries a
//! value of some erased type together with the means to encode it.

use std::any::{Any, TypeId};
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

type EncodeFn = fn(&(dyn Any + Send + Sync)) -> serde_json::Result<Value>;
type DecodeFn = fn(Value) -> serde_json::Result<Payload>;

// ---------------------------------------------------------------------------
// MediateKind
// ---------------------------------------------------------------------------

/// How a listener type participates in the mediator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediateKind {
    /// Request/response exchange: exactly one handler is invoked.
    Request,
    /// Broadcast event: every registered handler is invoked.
    Notification,
}

// ---------------------------------------------------------------------------
// TypeHandle
// ---------------------------------------------------------------------------

/// Runtime handle for a concrete, decodable message type.
///
/// Two handles are equal when they refer to the same Rust type.
#[derive(Clone, Copy)]
pub struct TypeHandle {
    id: TypeId,
    name: &'static str,
    decode: DecodeFn,
}

impl TypeHandle {
    /// Handle for `T`.
    #[must_use]
    pub fn of<T>() -> Self
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            decode: decode_as::<T>,
        }
    }

    #[must_use]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name, as reported by `std::any::type_name`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns `true` if this handle refers to `T`.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }

    /// Decodes a JSON value into a payload of this handle's type.
    ///
    /// # Errors
    ///
    /// Returns the decoder error when `value` does not have the target shape.
    pub fn decode(&self, value: Value) -> serde_json::Result<Payload> {
        (self.decode)(value)
    }
}

impl PartialEq for TypeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeHandle {}

impl std::hash::Hash for TypeHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeHandle").field(&self.name).finish()
    }
}

impl fmt::Display for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

fn decode_as<T>(value: Value) -> serde_json::Result<Payload>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    serde_json::from_value::<T>(value).map(Payload::new)
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// A message value of an erased type that can still be encoded.
///
/// Payloads are what flows through filter chains and into the mediator. The
/// original value is recoverable with [`Payload::downcast`] or
/// [`Payload::downcast_ref`].
pub struct Payload {
    type_id: TypeId,
    type_name: &'static str,
    value: Box<dyn Any + Send + Sync>,
    encode: EncodeFn,
}

impl Payload {
    pub fn new<T>(value: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            value: Box::new(value),
            encode: encode_as::<T>,
        }
    }

    /// The unit payload, used as the "no value" result of void handlers.
    #[must_use]
    pub fn unit() -> Self {
        Self::new(())
    }

    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Returns `true` for the unit payload.
    #[must_use]
    pub fn is_unit(&self) -> bool {
        self.is::<()>()
    }

    #[must_use]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Recovers the owned value, or hands the payload back on a type mismatch.
    ///
    /// # Errors
    ///
    /// Returns `self` unchanged when the payload does not hold a `T`.
    pub fn downcast<T: 'static>(self) -> Result<T, Self> {
        if !self.is::<T>() {
            return Err(self);
        }
        let Self {
            type_id,
            type_name,
            value,
            encode,
        } = self;
        value.downcast::<T>().map(|boxed| *boxed).map_err(|value| Self {
            type_id,
            type_name,
            value,
            encode,
        })
    }

    /// Encodes the payload from its runtime shape.
    ///
    /// # Errors
    ///
    /// Returns the serializer error for values that cannot be represented as JSON.
    pub fn encode(&self) -> serde_json::Result<Value> {
        (self.encode)(self.value.as_ref())
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}

fn encode_as<T: Serialize + 'static>(value: &(dyn Any + Send + Sync)) -> serde_json::Result<Value> {
    match value.downcast_ref::<T>() {
        Some(value) => serde_json::to_value(value),
        None => Err(<serde_json::Error as serde::ser::Error>::custom(format!(
            "payload does not hold a {}",
            std::any::type_name::<T>()
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
