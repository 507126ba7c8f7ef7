//! How a span ended.

use std::any::Any;
use std::error::Error;
use std::fmt::Display;

use serde::Serialize;
use serde_json::Value;

use crate::trace::ErrorInfo;

/// Terminal state handed to the recorder when a span ends.
#[derive(Debug, Clone, PartialEq)]
pub enum SpanOutcome {
    /// Normal completion; `result` is `None` when results are not recorded.
    Ok { result: Option<Value> },
    /// Failed completion.
    Error(ErrorInfo),
}

impl SpanOutcome {
    /// Completion without a recorded result.
    pub fn ok() -> Self {
        SpanOutcome::Ok { result: None }
    }

    pub fn with_result(result: Value) -> Self {
        SpanOutcome::Ok {
            result: Some(result),
        }
    }

    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        SpanOutcome::Error(ErrorInfo::new(kind, message))
    }

    /// Records an error value by its short type name and display text.
    ///
    /// The kind is the static type of `E`. Type-erased errors such as
    /// `Box<dyn Error>` or `anyhow::Error` therefore record the wrapper's
    /// name; use [`SpanOutcome::from_dyn_error`] to recover the concrete kind.
    pub fn from_error<E: Display + ?Sized>(err: &E) -> Self {
        SpanOutcome::error(short_type_name::<E>(), err.to_string())
    }

    /// Records a type-erased error by the kind of the value behind it.
    ///
    /// Common standard library and `serde_json` errors are recognized;
    /// anything else is recorded with the kind `Error`.
    pub fn from_dyn_error(err: &(dyn Error + 'static)) -> Self {
        SpanOutcome::error(error_kind(err).unwrap_or("Error"), err.to_string())
    }

    /// Records a panic payload caught by `catch_unwind`.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panicked".to_string());
        SpanOutcome::error("panic", message)
    }

    /// Outcome of a plain return value.
    pub fn of_value<T: Serialize + ?Sized>(value: &T, record: bool) -> Self {
        if record {
            SpanOutcome::with_result(capture(value))
        } else {
            SpanOutcome::ok()
        }
    }

    /// Outcome of a `Result`: `Err` becomes an error span, `Ok` is recorded
    /// like a plain value.
    pub fn of_result<T: Serialize, E: Display>(value: &Result<T, E>, record: bool) -> Self {
        match value {
            Ok(ok) => SpanOutcome::of_value(ok, record),
            Err(err) => SpanOutcome::from_error(err),
        }
    }

    /// Outcome of a `Result` whose success value is never recorded.
    pub fn of_result_status<T, E: Display>(value: &Result<T, E>) -> Self {
        match value {
            Ok(_) => SpanOutcome::ok(),
            Err(err) => SpanOutcome::from_error(err),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SpanOutcome::Error(_))
    }
}

/// Serializes a value for recording; values that fail to serialize are
/// recorded as a marker string rather than dropped.
pub fn capture<T: Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value)
        .unwrap_or_else(|e| Value::String(format!("<unserializable: {}>", e)))
}

/// Concrete kind of a type-erased error, when it is one of the well-known
/// error types.
pub fn error_kind(err: &(dyn Error + 'static)) -> Option<&'static str> {
    macro_rules! known {
        ($($ty:ty),+ $(,)?) => {
            $(
                if err.is::<$ty>() {
                    return Some(short_type_name::<$ty>());
                }
            )+
        };
    }
    known!(
        std::io::Error,
        std::num::ParseIntError,
        std::num::ParseFloatError,
        std::num::TryFromIntError,
        std::str::ParseBoolError,
        std::str::Utf8Error,
        std::string::FromUtf8Error,
        std::net::AddrParseError,
        std::fmt::Error,
        serde_json::Error,
    );
    None
}

/// Type name without its module path, keeping generic arguments.
///
/// `core::num::error::ParseIntError` becomes `ParseIntError`,
/// `alloc::boxed::Box<dyn core::error::Error>` becomes
/// `Box<dyn core::error::Error>`.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    shorten(std::any::type_name::<T>())
}

fn shorten(full: &'static str) -> &'static str {
    let head_end = full.find('<').unwrap_or(full.len());
    let start = full[..head_end].rfind("::").map_or(0, |i| i + 2);
    &full[start..]
}
