//! Type-level tracing: every public method of a type is traced unless opted out.

use std::borrow::Cow;
use std::fmt::Display;

use serde::Serialize;
use serde_json::Value;
use traced_core::{
    capture, short_type_name, validate_exclusion, validate_name, InstrumentationError,
    SpanOutcome,
};

use super::{run, TraceOptions};

/// Opt-in tracing for all public methods of a type.
///
/// Implement it (overriding the constants as needed) and put
/// `#[traced_methods]` on the type's impl blocks. Methods whose names start
/// with `_` or appear in [`Traced::EXCLUDE`] run untraced.
///
/// ```rust
/// use traced::{traced_methods, Traced};
///
/// struct Calculator;
///
/// impl Traced for Calculator {
///     const EXCLUDE: &'static [&'static str] = &["reset"];
/// }
///
/// #[traced_methods]
/// impl Calculator {
///     pub fn add(&self, a: i64, b: i64) -> i64 {
///         a + b
///     }
///
///     pub fn reset(&mut self) {}
/// }
///
/// assert_eq!(Calculator.add(2, 3), 5);
/// ```
pub trait Traced {
    /// Method names that are never traced.
    const EXCLUDE: &'static [&'static str] = &[];
    const RECORD_PARAMS: bool = true;
    const RECORD_RESULTS: bool = true;

    /// Component name recorded on method spans; the type name by default.
    fn component() -> &'static str {
        short_type_name::<Self>()
    }

    /// Saves an artifact on the span of the method currently running.
    fn save_artifact<P: Serialize + ?Sized>(&self, name: &str, payload: &P) -> Option<String> {
        super::save_artifact(name, payload)
    }

    /// Records an event without payload on the current method span.
    fn trace_event(&self, label: &str) -> bool {
        super::add_event(label, None)
    }

    /// Records an event with a payload on the current method span.
    fn trace_event_with<P: Serialize + ?Sized>(&self, label: &str, payload: &P) -> bool {
        super::add_event(label, Some(capture(payload)))
    }
}

/// Runtime description of how a type's methods are traced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracePolicy {
    component: String,
    exclude: Vec<String>,
    record_params: bool,
    record_results: bool,
}

impl TracePolicy {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            exclude: Vec::new(),
            record_params: true,
            record_results: true,
        }
    }

    /// Policy mirroring a [`Traced`] implementation.
    pub fn for_type<T: Traced + ?Sized>() -> Self {
        Self {
            component: T::component().to_string(),
            exclude: T::EXCLUDE.iter().map(|m| m.to_string()).collect(),
            record_params: T::RECORD_PARAMS,
            record_results: T::RECORD_RESULTS,
        }
    }

    pub fn exclude(mut self, method: impl Into<String>) -> Self {
        self.exclude.push(method.into());
        self
    }

    pub fn record_params(mut self, record: bool) -> Self {
        self.record_params = record;
        self
    }

    pub fn record_results(mut self, record: bool) -> Self {
        self.record_results = record;
        self
    }

    /// Validates the component name and exclusion list.
    pub fn build(self) -> Result<ClassTracer, InstrumentationError> {
        validate_name(&self.component)?;
        for entry in &self.exclude {
            validate_exclusion(&self.component, entry)?;
        }
        Ok(ClassTracer { policy: self })
    }
}

/// Traces method calls by name under a validated [`TracePolicy`].
#[derive(Debug, Clone)]
pub struct ClassTracer {
    policy: TracePolicy,
}

impl ClassTracer {
    pub fn policy(&self) -> &TracePolicy {
        &self.policy
    }

    pub fn is_traced(&self, method: &str) -> bool {
        !method.starts_with('_') && !self.policy.exclude.iter().any(|m| m == method)
    }

    /// Span options for `method`, or `None` when it runs untraced.
    pub fn options(&self, method: &str) -> Option<TraceOptions> {
        if !self.is_traced(method) {
            return None;
        }
        Some(
            TraceOptions::new(Cow::Owned(method.to_string()))
                .component(Cow::Owned(self.policy.component.clone()))
                .record_params(self.policy.record_params)
                .record_results(self.policy.record_results),
        )
    }

    /// Runs `f` as a call of `method`.
    pub fn call<T, F>(&self, method: &str, params: Option<Value>, f: F) -> T
    where
        F: FnOnce() -> T,
        T: Serialize,
    {
        match self.options(method) {
            Some(options) => run(&options, params, f, |value, record| {
                SpanOutcome::of_value(value, record)
            }),
            None => f(),
        }
    }

    /// Runs a fallible `f` as a call of `method`.
    pub fn try_call<T, E, F>(&self, method: &str, params: Option<Value>, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        T: Serialize,
        E: Display,
    {
        match self.options(method) {
            Some(options) => run(&options, params, f, |value, record| {
                SpanOutcome::of_result(value, record)
            }),
            None => f(),
        }
    }
}
