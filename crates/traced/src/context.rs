//! Per-flow span stacks.
//!
//! A flow is one thread, one tokio task, or one future running inside a flow
//! scope. Each flow owns a LIFO stack of open span ids plus the trace they belong to, held
//! in a single process-wide registry keyed by [`FlowId`]. Flows never see each
//! other's stacks unless one explicitly attaches to a [`ContextSnapshot`]
//! taken in another.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::task::{Context, Poll};

use tracing::warn;
use traced_core::ContextError;

/// Identity of a thread or task flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowId(FlowKey);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FlowKey {
    /// A thread, or a future scoped with [`ContextSnapshot::scope`].
    Local(u64),
    /// A tokio task polled outside any flow scope.
    Task(tokio::task::Id),
}

impl FlowId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        FlowId(FlowKey::Local(NEXT.fetch_add(1, Ordering::Relaxed)))
    }

    fn task(id: tokio::task::Id) -> Self {
        FlowId(FlowKey::Task(id))
    }
}

thread_local! {
    static THREAD_FLOW: FlowId = FlowId::next();
}

tokio::task_local! {
    static TASK_FLOW: FlowId;
}

/// Flow of the caller: the enclosing flow scope if one is active, else the
/// running tokio task, else the current thread.
///
/// Tasks sharing a worker thread interleave at every `.await`, so a task
/// never falls back to the thread's stack.
pub fn current_flow() -> FlowId {
    TASK_FLOW
        .try_with(|flow| *flow)
        .ok()
        .or_else(|| tokio::task::try_id().map(FlowId::task))
        .unwrap_or_else(|| THREAD_FLOW.with(|flow| *flow))
}

#[derive(Debug, Clone)]
struct FlowContext {
    trace_id: String,
    /// Span of another flow this flow was attached under.
    base_parent: Option<String>,
    stack: Vec<String>,
    attached: bool,
}

type Registry = HashMap<FlowId, FlowContext>;

fn registry() -> &'static Mutex<Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn lock() -> MutexGuard<'static, Registry> {
    // A panic while holding the lock cannot leave a stack half-updated.
    registry().lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Trace of the innermost open span in the current flow.
pub fn current_trace_id() -> Option<String> {
    current_trace_id_in(current_flow())
}

/// Innermost open span in the current flow.
pub fn current_span_id() -> Option<String> {
    current_span_id_in(current_flow())
}

pub(crate) fn current_trace_id_in(flow: FlowId) -> Option<String> {
    lock().get(&flow).map(|ctx| ctx.trace_id.clone())
}

pub(crate) fn current_span_id_in(flow: FlowId) -> Option<String> {
    lock()
        .get(&flow)
        .and_then(|ctx| ctx.stack.last().or(ctx.base_parent.as_ref()).cloned())
}

/// Makes `span_id` the active span of the current flow.
pub fn push_span(trace_id: &str, span_id: &str) {
    push_span_in(current_flow(), trace_id, span_id);
}

/// Removes `span_id` from the top of the current flow's stack.
pub fn pop_span(span_id: &str) {
    pop_span_in(current_flow(), span_id);
}

pub(crate) fn push_span_in(flow: FlowId, trace_id: &str, span_id: &str) {
    lock()
        .entry(flow)
        .or_insert_with(|| FlowContext {
            trace_id: trace_id.to_string(),
            base_parent: None,
            stack: Vec::new(),
            attached: false,
        })
        .stack
        .push(span_id.to_string());
}

pub(crate) fn pop_span_in(flow: FlowId, span_id: &str) {
    let mut registry = lock();
    let Some(ctx) = registry.get_mut(&flow) else {
        warn!("{}", ContextError::Underflow { span_id: span_id.to_string() });
        return;
    };

    match ctx.stack.iter().rposition(|id| id == span_id) {
        Some(pos) if pos + 1 == ctx.stack.len() => {
            ctx.stack.pop();
        }
        Some(pos) => {
            // Spans opened above this one were never ended; drop them too.
            let top = ctx.stack.last().cloned().unwrap_or_default();
            warn!("{}", ContextError::OutOfOrder { span_id: span_id.to_string(), top });
            ctx.stack.truncate(pos);
        }
        None => {
            warn!("{}", ContextError::Underflow { span_id: span_id.to_string() });
        }
    }

    if ctx.stack.is_empty() && !ctx.attached {
        registry.remove(&flow);
    }
}

/// Active trace and span of a flow, captured to be continued elsewhere.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextSnapshot {
    trace_id: Option<String>,
    span_id: Option<String>,
}

/// Captures the current flow's active trace and span.
pub fn snapshot() -> ContextSnapshot {
    let flow = current_flow();
    let registry = lock();
    match registry.get(&flow) {
        Some(ctx) => ContextSnapshot {
            trace_id: Some(ctx.trace_id.clone()),
            span_id: ctx.stack.last().or(ctx.base_parent.as_ref()).cloned(),
        },
        None => ContextSnapshot::default(),
    }
}

impl ContextSnapshot {
    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn span_id(&self) -> Option<&str> {
        self.span_id.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.trace_id.is_none()
    }

    /// Continues the captured span in the current thread until the guard drops.
    ///
    /// ```rust
    /// let snapshot = traced::context::snapshot();
    /// std::thread::spawn(move || {
    ///     let _guard = snapshot.attach();
    ///     // spans started here are children of the captured span
    /// })
    /// .join()
    /// .unwrap();
    /// ```
    pub fn attach(&self) -> AttachGuard {
        attach_in(current_flow(), self)
    }

    /// Runs `fut` in a fresh task flow whose spans continue the captured span.
    pub fn scope<F: Future>(self, fut: F) -> impl Future<Output = F::Output> {
        let flow = FlowId::next();
        let guard = attach_in(flow, &self);
        TASK_FLOW.scope(
            flow,
            Attached {
                fut: Box::pin(fut),
                _guard: guard,
            },
        )
    }
}

/// Runs `fut` in a fresh, empty task flow.
pub fn in_new_flow<F: Future>(fut: F) -> impl Future<Output = F::Output> {
    ContextSnapshot::default().scope(fut)
}

fn attach_in(flow: FlowId, snapshot: &ContextSnapshot) -> AttachGuard {
    let Some(ref trace_id) = snapshot.trace_id else {
        return AttachGuard {
            flow,
            previous: None,
            active: false,
        };
    };
    let previous = lock().insert(
        flow,
        FlowContext {
            trace_id: trace_id.clone(),
            base_parent: snapshot.span_id.clone(),
            stack: Vec::new(),
            attached: true,
        },
    );
    AttachGuard {
        flow,
        previous,
        active: true,
    }
}

/// Keeps a flow attached to a snapshot; restores the flow's previous state on drop.
#[must_use = "the flow detaches as soon as the guard is dropped"]
pub struct AttachGuard {
    flow: FlowId,
    previous: Option<FlowContext>,
    active: bool,
}

impl Drop for AttachGuard {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        let mut registry = lock();
        match self.previous.take() {
            Some(previous) => {
                registry.insert(self.flow, previous);
            }
            None => {
                registry.remove(&self.flow);
            }
        }
    }
}

// Field order matters: the future (and any span guards it holds) drops
// before the flow detaches.
struct Attached<F> {
    fut: Pin<Box<F>>,
    _guard: AttachGuard,
}

impl<F: Future> Future for Attached<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<F::Output> {
        self.fut.as_mut().poll(cx)
    }
}
