//! Typed event handlers.
//!
//! Any `Fn(A, B, ..) -> R` closure with up to four [`DeserializeOwned`]
//! arguments and an [`IntoReply`] return value is a [`Handler`]. Registration
//! erases it into a [`HandlerEntry`] that remembers the declared arity and
//! argument types and decodes raw payload slots straight into them.
//!
//! # Example
//!
//! ```ignore
//! client.on("add", |a: i64, b: i64| (a + b,))?;
//! client.on("greet", |name: Option<String>| {
//!     tracing::info!(?name, "greeted");
//! })?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::value::RawValue;

use crate::error::Result;
use crate::protocol::{FromArgs, HandlerReply, IntoReply};

// ============================================================================
// Handler
// ============================================================================

/// A callable with a statically known argument list.
///
/// `Args` is the tuple of declared argument types; it only exists to keep
/// the implementations for different arities apart.
pub trait Handler<Args: FromArgs>: Send + Sync + 'static {
    /// Decodes `args` into the declared types and invokes the handler.
    ///
    /// # Errors
    ///
    /// Returns a decode error if an argument does not match, or an encode
    /// error if the return value cannot be serialized.
    fn call(&self, args: &[Box<RawValue>]) -> Result<HandlerReply>;
}

macro_rules! impl_handler {
    ($($name:ident),*) => {
        impl<F, R, $($name,)*> Handler<($($name,)*)> for F
        where
            F: Fn($($name),*) -> R + Send + Sync + 'static,
            R: IntoReply,
            $($name: DeserializeOwned,)*
        {
            #[allow(non_snake_case)]
            fn call(&self, args: &[Box<RawValue>]) -> Result<HandlerReply> {
                let ($($name,)*) = <($($name,)*) as FromArgs>::from_args(args)?;
                (self)($($name),*).into_reply()
            }
        }
    };
}

impl_handler!();
impl_handler!(A);
impl_handler!(A, B);
impl_handler!(A, B, C);
impl_handler!(A, B, C, D);

// ============================================================================
// HandlerEntry
// ============================================================================

type Invoke = Box<dyn Fn(&[Box<RawValue>]) -> Result<HandlerReply> + Send + Sync>;

/// A registered handler with its declared signature.
pub struct HandlerEntry {
    arity: usize,
    argument_types: Vec<&'static str>,
    invoke: Invoke,
}

impl HandlerEntry {
    /// Erases `handler`, recording its signature.
    #[must_use]
    pub fn new<H, Args>(handler: H) -> Self
    where
        H: Handler<Args>,
        Args: FromArgs,
    {
        Self {
            arity: Args::ARITY,
            argument_types: Args::type_names(),
            invoke: Box::new(move |args| handler.call(args)),
        }
    }

    /// Returns the number of declared arguments.
    #[inline]
    #[must_use]
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Returns the declared argument type names.
    #[inline]
    #[must_use]
    pub fn argument_types(&self) -> &[&'static str] {
        &self.argument_types
    }

    /// Invokes the handler on raw argument slots.
    ///
    /// # Errors
    ///
    /// See [`Handler::call`].
    pub fn invoke(&self, args: &[Box<RawValue>]) -> Result<HandlerReply> {
        (self.invoke)(args)
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("arity", &self.arity)
            .field("argument_types", &self.argument_types)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    fn raw(values: &[&str]) -> Vec<Box<RawValue>> {
        values
            .iter()
            .map(|v| RawValue::from_string((*v).to_string()).expect("valid json"))
            .collect()
    }

    #[test]
    fn test_zero_arg_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let entry = HandlerEntry::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(entry.arity(), 0);
        let reply = entry.invoke(&raw(&["\"ignored\""])).expect("invoke");
        assert_eq!(reply, HandlerReply::default());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_typed_handler_returns_values() {
        let entry = HandlerEntry::new(|a: i64, b: i64| (a + b, "sum"));

        assert_eq!(entry.arity(), 2);
        assert_eq!(entry.argument_types(), ["i64", "i64"]);

        let reply = entry.invoke(&raw(&["2", "3"])).expect("invoke");
        assert_eq!(reply.values, vec![json!(5), json!("sum")]);
        assert_eq!(reply.error, None);
    }

    #[test]
    fn test_handler_error_is_split_off() {
        let entry = HandlerEntry::new(|n: u32| {
            if n == 0 {
                Err("zero")
            } else {
                Ok((n,))
            }
        });

        let reply = entry.invoke(&raw(&["0"])).expect("invoke");
        assert!(reply.values.is_empty());
        assert_eq!(reply.error.as_deref(), Some("zero"));
    }

    #[test]
    fn test_argument_mismatch_is_decode_error() {
        let entry = HandlerEntry::new(|_: u32| ());
        let err = entry.invoke(&raw(&["\"text\""])).unwrap_err();
        assert!(err.is_codec_error());
    }
}
