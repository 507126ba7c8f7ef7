//! Instrumentation adapters.
//!
//! Every adapter funnels into [`run`] (sync) or [`run_async`] (async), which
//! open a span, run the wrapped call, and end the span with the call's
//! outcome even if it panics or is cancelled. The `#[traced]` family of
//! attribute macros expands to calls of these functions.

mod class;
mod scoped;

pub use class::{ClassTracer, TracePolicy, Traced};
pub use scoped::{
    add_event, current_span, in_span, save_artifact, save_artifact_as, save_binary_artifact,
    save_text_artifact, span, try_span, ScopedSpan,
};

use std::borrow::Cow;
use std::fmt::Display;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};

use futures::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;
use traced_core::{capture, validate_name, InstrumentationError, SpanOutcome};

use crate::context;
use crate::recorder::{recorder, SpanHandle, SpanStart};

/// How one traced function or method is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceOptions {
    pub name: Cow<'static, str>,
    pub component: Option<Cow<'static, str>>,
    pub record_params: bool,
    pub record_results: bool,
}

impl TraceOptions {
    /// Records params and results by default.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            component: None,
            record_params: true,
            record_results: true,
        }
    }

    pub fn component(mut self, component: impl Into<Cow<'static, str>>) -> Self {
        self.component = Some(component.into());
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

    pub fn validate(&self) -> Result<(), InstrumentationError> {
        validate_name(&self.name)?;
        if let Some(ref component) = self.component {
            validate_name(component)?;
        }
        Ok(())
    }

    /// Options for a method of a [`Traced`] type, or `None` when the method
    /// is excluded or underscore-prefixed.
    pub fn for_method<T: Traced + ?Sized>(method: &'static str) -> Option<Self> {
        if method.starts_with('_') || T::EXCLUDE.contains(&method) {
            return None;
        }
        Some(
            TraceOptions::new(method)
                .component(T::component())
                .record_params(T::RECORD_PARAMS)
                .record_results(T::RECORD_RESULTS),
        )
    }

    fn span_start(&self, params: Option<Value>) -> SpanStart {
        SpanStart {
            name: self.name.to_string(),
            component: self.component.as_ref().map(|c| c.to_string()),
            params: params.filter(|_| self.record_params),
        }
    }
}

/// Named call arguments, captured as a JSON object.
#[derive(Debug, Default)]
pub struct Params(Map<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg<T: Serialize + ?Sized>(mut self, name: &str, value: &T) -> Self {
        self.0.insert(name.to_string(), capture(value));
        self
    }

    pub fn finish(self) -> Value {
        Value::Object(self.0)
    }
}

/// Runs `call` inside a span described by `options`.
///
/// `outcome` turns the return value into the span's terminal state; it is
/// handed `options.record_results`. A panic ends the span as an error of
/// kind `panic` and then continues unwinding.
pub fn run<T, F, O>(options: &TraceOptions, params: Option<Value>, call: F, outcome: O) -> T
where
    F: FnOnce() -> T,
    O: FnOnce(&T, bool) -> SpanOutcome,
{
    let handle = recorder().start_span(options.span_start(params));
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(value) => {
            recorder().end_span(&handle, outcome(&value, options.record_results));
            value
        }
        Err(payload) => {
            recorder().end_span(&handle, SpanOutcome::from_panic(payload.as_ref()));
            panic::resume_unwind(payload)
        }
    }
}

/// Async counterpart of [`run`].
///
/// The future runs in its own task flow that continues the caller's active
/// span, so concurrently awaited traced futures never share a span stack.
/// Dropping the future before completion ends the span with kind `cancelled`.
pub async fn run_async<T, Fut, O>(
    options: TraceOptions,
    params: Option<Value>,
    fut: Fut,
    outcome: O,
) -> T
where
    Fut: Future<Output = T>,
    O: FnOnce(&T, bool) -> SpanOutcome,
{
    context::snapshot()
        .scope(traced_future(options, params, fut, outcome))
        .await
}

async fn traced_future<T, Fut, O>(
    options: TraceOptions,
    params: Option<Value>,
    fut: Fut,
    outcome: O,
) -> T
where
    Fut: Future<Output = T>,
    O: FnOnce(&T, bool) -> SpanOutcome,
{
    let mut guard = CancelGuard(Some(recorder().start_span(options.span_start(params))));
    let result = AssertUnwindSafe(fut).catch_unwind().await;

    let span_outcome = match result {
        Ok(ref value) => outcome(value, options.record_results),
        Err(ref payload) => SpanOutcome::from_panic(payload.as_ref()),
    };
    if let Some(handle) = guard.0.take() {
        recorder().end_span(&handle, span_outcome);
    }
    match result {
        Ok(value) => value,
        Err(payload) => panic::resume_unwind(payload),
    }
}

struct CancelGuard(Option<SpanHandle>);

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            recorder().end_span(
                &handle,
                SpanOutcome::error("cancelled", "future dropped before completion"),
            );
        }
    }
}

/// A callable wrapped so that every call is traced.
#[derive(Debug, Clone)]
pub struct Decorated<F> {
    options: TraceOptions,
    f: F,
}

/// Wraps a one-argument callable; the argument is recorded as `arg`.
///
/// ```rust
/// use traced::{decorate, TraceOptions};
///
/// let double = decorate(TraceOptions::new("double"), |x: i32| x * 2).unwrap();
/// assert_eq!(double.call(21), 42);
/// assert!(decorate(TraceOptions::new(""), |x: i32| x).is_err());
/// ```
pub fn decorate<F>(options: TraceOptions, f: F) -> Result<Decorated<F>, InstrumentationError> {
    options.validate()?;
    Ok(Decorated { options, f })
}

impl<F> Decorated<F> {
    pub fn options(&self) -> &TraceOptions {
        &self.options
    }

    fn params<A: Serialize>(&self, arg: &A) -> Option<Value> {
        self.options
            .record_params
            .then(|| Params::new().arg("arg", arg).finish())
    }

    pub fn call<A, R>(&self, arg: A) -> R
    where
        F: Fn(A) -> R,
        A: Serialize,
        R: Serialize,
    {
        let params = self.params(&arg);
        run(&self.options, params, || (self.f)(arg), |value, record| {
            SpanOutcome::of_value(value, record)
        })
    }

    /// Calls a fallible callable; `Err` ends the span as an error and is
    /// returned unchanged.
    pub fn try_call<A, T, E>(&self, arg: A) -> Result<T, E>
    where
        F: Fn(A) -> Result<T, E>,
        A: Serialize,
        T: Serialize,
        E: Display,
    {
        let params = self.params(&arg);
        run(&self.options, params, || (self.f)(arg), |value, record| {
            SpanOutcome::of_result(value, record)
        })
    }
}

fn checked(name: Cow<'static, str>) -> TraceOptions {
    let options = TraceOptions::new(name);
    if let Err(e) = options.validate() {
        warn!("{}", e);
    }
    options
}

/// Runs `f` in a span named `name`, recording its return value.
pub fn trace<T, F>(name: impl Into<Cow<'static, str>>, f: F) -> T
where
    F: FnOnce() -> T,
    T: Serialize,
{
    run(&checked(name.into()), None, f, |value, record| {
        SpanOutcome::of_value(value, record)
    })
}

/// Runs a fallible `f` in a span named `name`.
pub fn try_trace<T, E, F>(name: impl Into<Cow<'static, str>>, f: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E>,
    T: Serialize,
    E: Display,
{
    run(&checked(name.into()), None, f, |value, record| {
        SpanOutcome::of_result(value, record)
    })
}
