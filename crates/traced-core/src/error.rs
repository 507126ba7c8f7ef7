//! Errors raised by the tracing machinery itself.

use thiserror::Error;

/// An instrumentation adapter was misapplied.
///
/// This is the only tracing error that reaches integrators, and only at
/// setup time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InstrumentationError {
    #[error("Traced name must not be empty")]
    EmptyName,

    #[error("Invalid traced name: {0:?}")]
    InvalidName(String),

    #[error("Invalid exclusion {entry:?} for {component}")]
    InvalidExclusion { component: String, entry: String },
}

/// Stack discipline was violated in a flow's context.
///
/// Logged and recovered from; never returned to instrumented code.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Popped span {span_id} from an empty context")]
    Underflow { span_id: String },

    #[error("Popped span {span_id} while {top} was on top of the stack")]
    OutOfOrder { span_id: String, top: String },
}

/// Checks a span, function or component name.
///
/// Names may contain anything printable except whitespace at either end.
pub fn validate_name(name: &str) -> Result<(), InstrumentationError> {
    if name.is_empty() {
        return Err(InstrumentationError::EmptyName);
    }
    if name.trim() != name || name.chars().any(char::is_control) {
        return Err(InstrumentationError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Checks a method name listed for exclusion.
pub fn validate_exclusion(component: &str, entry: &str) -> Result<(), InstrumentationError> {
    let mut chars = entry.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c == '_' || c.is_alphabetic())
        && chars.all(|c| c == '_' || c.is_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(InstrumentationError::InvalidExclusion {
            component: component.to_string(),
            entry: entry.to_string(),
        })
    }
}
