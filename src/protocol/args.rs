//! Argument marshalling.
//!
//! | Trait | Direction | Implemented for |
//! |-------|-----------|-----------------|
//! | [`FromArgs`] | payload → handler arguments | `()` and tuples of up to four `DeserializeOwned` |
//! | [`IntoArgs`] | emit arguments → payload | `()`, `&str`, `String`, `Vec<Value>`, tuples of up to four `Serialize` |
//! | [`IntoReply`] | handler return → ack payload | `()`, `Value`, `Vec<Value>`, tuples, `Result<T, E>` |

// ============================================================================
// Imports
// ============================================================================

use std::any::type_name;
use std::fmt::Display;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::value::RawValue;

use crate::error::{Error, Result};

// ============================================================================
// FromArgs
// ============================================================================

/// A fixed-arity argument list decoded from raw payload slots.
///
/// Slots beyond the arity are ignored. Missing trailing slots decode from
/// `null`, so declare trailing arguments as `Option<T>` to accept senders
/// that provide fewer values.
pub trait FromArgs: Sized {
    /// Number of declared arguments.
    const ARITY: usize;

    /// Declared argument type names, in order.
    fn type_names() -> Vec<&'static str>;

    /// Decodes the argument list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] naming the first argument that does not match.
    fn from_args(args: &[Box<RawValue>]) -> Result<Self>;
}

/// Decodes slot `index` into `T`, treating a missing slot as `null`.
fn decode_arg<T: DeserializeOwned>(args: &[Box<RawValue>], index: usize) -> Result<T> {
    let raw = args.get(index).map_or("null", |raw| raw.get());
    serde_json::from_str(raw).map_err(|e| {
        Error::decode(format!(
            "argument {index} as {}: {e}",
            type_name::<T>()
        ))
    })
}

impl FromArgs for () {
    const ARITY: usize = 0;

    fn type_names() -> Vec<&'static str> {
        Vec::new()
    }

    fn from_args(_args: &[Box<RawValue>]) -> Result<Self> {
        Ok(())
    }
}

macro_rules! impl_from_args {
    ($arity:expr; $($name:ident : $index:tt),+) => {
        impl<$($name: DeserializeOwned),+> FromArgs for ($($name,)+) {
            const ARITY: usize = $arity;

            fn type_names() -> Vec<&'static str> {
                vec![$(type_name::<$name>()),+]
            }

            fn from_args(args: &[Box<RawValue>]) -> Result<Self> {
                Ok(($(decode_arg::<$name>(args, $index)?,)+))
            }
        }
    };
}

impl_from_args!(1; A: 0);
impl_from_args!(2; A: 0, B: 1);
impl_from_args!(3; A: 0, B: 1, C: 2);
impl_from_args!(4; A: 0, B: 1, C: 2, D: 3);

// ============================================================================
// IntoArgs
// ============================================================================

/// Values emitted after the event name.
pub trait IntoArgs {
    /// Serializes the arguments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] if a value cannot be serialized.
    fn into_args(self) -> Result<Vec<Value>>;
}

fn encode_value<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| Error::encode(format!("{}: {e}", type_name::<T>())))
}

impl IntoArgs for () {
    fn into_args(self) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }
}

impl IntoArgs for &str {
    fn into_args(self) -> Result<Vec<Value>> {
        Ok(vec![Value::from(self)])
    }
}

impl IntoArgs for String {
    fn into_args(self) -> Result<Vec<Value>> {
        Ok(vec![Value::from(self)])
    }
}

impl IntoArgs for Vec<Value> {
    fn into_args(self) -> Result<Vec<Value>> {
        Ok(self)
    }
}

macro_rules! impl_into_args {
    ($($name:ident),+) => {
        impl<$($name: Serialize),+> IntoArgs for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_args(self) -> Result<Vec<Value>> {
                let ($($name,)+) = self;
                Ok(vec![$(encode_value($name)?),+])
            }
        }
    };
}

impl_into_args!(A);
impl_into_args!(A, B);
impl_into_args!(A, B, C);
impl_into_args!(A, B, C, D);

// ============================================================================
// IntoReply
// ============================================================================

/// Outcome of one handler invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerReply {
    /// Values sent back in the acknowledgement.
    pub values: Vec<Value>,
    /// The handler's error, split off the return values.
    pub error: Option<String>,
}

impl HandlerReply {
    /// A reply carrying only `error`.
    #[must_use]
    pub fn failed(error: impl Display) -> Self {
        Self {
            values: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

/// A handler return value.
pub trait IntoReply {
    /// Converts into acknowledgement values plus an optional error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] if a value cannot be serialized.
    fn into_reply(self) -> Result<HandlerReply>;
}

impl IntoReply for () {
    fn into_reply(self) -> Result<HandlerReply> {
        Ok(HandlerReply::default())
    }
}

impl IntoReply for Value {
    fn into_reply(self) -> Result<HandlerReply> {
        Ok(HandlerReply {
            values: vec![self],
            error: None,
        })
    }
}

impl IntoReply for Vec<Value> {
    fn into_reply(self) -> Result<HandlerReply> {
        Ok(HandlerReply {
            values: self,
            error: None,
        })
    }
}

impl<T: IntoReply, E: Display> IntoReply for std::result::Result<T, E> {
    fn into_reply(self) -> Result<HandlerReply> {
        match self {
            Ok(value) => value.into_reply(),
            Err(e) => Ok(HandlerReply::failed(e)),
        }
    }
}

macro_rules! impl_into_reply {
    ($($name:ident),+) => {
        impl<$($name: Serialize),+> IntoReply for ($($name,)+) {
            fn into_reply(self) -> Result<HandlerReply> {
                Ok(HandlerReply {
                    values: self.into_args()?,
                    error: None,
                })
            }
        }
    };
}

impl_into_reply!(A);
impl_into_reply!(A, B);
impl_into_reply!(A, B, C);
impl_into_reply!(A, B, C, D);

// ============================================================================
// Tests
// ============================================================================
