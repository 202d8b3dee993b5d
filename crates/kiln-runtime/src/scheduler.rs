//! Execution scheduler — runs one invocation to a terminal state.
//!
//! Each invocation gets a fresh engine runtime and context on a blocking
//! worker thread. The scheduler calls the entry point, then drives the
//! context's job queue until the returned promise settles, the deadline
//! passes, or the queue runs dry with the promise still pending. Once the
//! entry point has settled, jobs it queued without awaiting still run to
//! the end of the queue before the response is read.
//!
//! A promise left pending with no queued jobs can never settle (there are
//! no timers or I/O in the sandbox). The worker gives up on it right away
//! and the async side waits out the remaining budget before reporting
//! `TimedOut`, so callers observe the configured duration either way.
//!
//! ```text
//! Created ──▶ Running ──▶ Completed
//!                    ├──▶ Failed
//!                    └──▶ TimedOut
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kiln_core::{HandlerContract, Request};
use rquickjs::function::This;
use rquickjs::promise::PromiseState;
use rquickjs::{CatchResultExt, CaughtError, Ctx, Function, Value};
use tracing::{debug, info, warn};

use crate::detect::entry_function;
use crate::error::InvocationError;
use crate::limiter::{Deadline, ResourceLimits};
use crate::marshal::{HandlerArgs, ScriptResponse, returned_body};
use crate::module::{ScriptModule, fresh_context};
use crate::rejections::RejectionTracker;
use crate::sink::OutputSink;
use crate::slots::Slot;
use crate::surface::Surface;

/// Extra time the async caller waits for the worker past the deadline.
///
/// The interrupt handler normally stops script code well inside this.
pub const BACKSTOP_GRACE: Duration = Duration::from_millis(250);

/// Lifecycle of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Created,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl InvocationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InvocationState::Completed | InvocationState::Failed | InvocationState::TimedOut
        )
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: InvocationState) -> bool {
        match self {
            InvocationState::Created => next == InvocationState::Running,
            InvocationState::Running => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InvocationState::Created => "created",
            InvocationState::Running => "running",
            InvocationState::Completed => "completed",
            InvocationState::Failed => "failed",
            InvocationState::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits for a single invocation.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionSettings {
    pub timeout: Duration,
    pub limits: ResourceLimits,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            timeout: crate::DEFAULT_TIMEOUT,
            limits: ResourceLimits::default(),
        }
    }
}

/// Everything an invocation left behind once its context is gone.
#[derive(Debug, Clone)]
pub struct Execution {
    pub id: u64,
    pub module: String,
    pub contract: HandlerContract,
    pub state: InvocationState,
    /// Output sink snapshot.
    pub output: Vec<u8>,
    /// Bytes the sink discarded past its cap.
    pub dropped_output: usize,
    /// Final state of the two-arg response value.
    pub response: Option<ScriptResponse>,
    /// Body bytes from the settled return value, if it was text or bytes.
    pub returned: Option<Vec<u8>>,
    pub error: Option<InvocationError>,
    /// Reasons of promises that were rejected and never handled.
    pub unhandled_rejections: Vec<String>,
    pub elapsed: Duration,
    /// The promise was pending with nothing left to run.
    stalled: bool,
}

impl Execution {
    pub(crate) fn new(id: u64, module: &str, contract: HandlerContract) -> Self {
        Self {
            id,
            module: module.to_string(),
            contract,
            state: InvocationState::Created,
            output: Vec::new(),
            dropped_output: 0,
            response: None,
            returned: None,
            error: None,
            unhandled_rejections: Vec::new(),
            elapsed: Duration::ZERO,
            stalled: false,
        }
    }

    fn transition(&mut self, next: InvocationState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        if self.state.can_transition_to(next) {
            self.state = next;
        }
    }

    pub(crate) fn fail(&mut self, error: InvocationError) {
        if self.state == InvocationState::Created {
            self.transition(InvocationState::Running);
        }
        let next = match error {
            InvocationError::Timeout(_) => InvocationState::TimedOut,
            _ => InvocationState::Failed,
        };
        self.transition(next);
        self.error = Some(error);
    }
}

/// Run one invocation of `module` against `request`.
///
/// `slot` moves onto the blocking worker and is released when the worker
/// exits, which may be after this returns if the backstop fired.
///
/// Never fails: every script or engine problem ends up in the returned
/// execution's terminal state.
pub async fn run(
    module: Arc<ScriptModule>,
    request: Request,
    id: u64,
    settings: ExecutionSettings,
    slot: Slot,
) -> Execution {
    let started = Instant::now();
    let name = module.name().to_string();
    let contract = module.contract();
    debug!(invocation = id, module = %name, %contract, "invocation created");

    let worker = tokio::task::spawn_blocking(move || {
        let _slot = slot;
        execute(&module, &request, id, &settings)
    });
    let backstop = settings.timeout.saturating_add(BACKSTOP_GRACE);
    let mut execution = match tokio::time::timeout(backstop, worker).await {
        Ok(Ok(execution)) => execution,
        Ok(Err(join_error)) => {
            let mut execution = Execution::new(id, &name, contract);
            execution.fail(InvocationError::Engine(format!("worker failed: {join_error}")));
            execution
        }
        Err(_) => {
            let mut execution = Execution::new(id, &name, contract);
            execution.fail(InvocationError::Timeout(settings.timeout));
            execution
        }
    };

    if execution.stalled {
        if let Some(until) = started.checked_add(settings.timeout) {
            tokio::time::sleep_until(until.into()).await;
        }
    }
    execution.elapsed = started.elapsed();

    let elapsed_ms = execution.elapsed.as_millis() as u64;
    match &execution.error {
        None => info!(
            invocation = id,
            module = %execution.module,
            contract = %execution.contract,
            state = %execution.state,
            elapsed_ms,
            "invocation finished"
        ),
        Some(error) => warn!(
            invocation = id,
            module = %execution.module,
            contract = %execution.contract,
            state = %execution.state,
            elapsed_ms,
            error = %error,
            "invocation did not complete"
        ),
    }
    for reason in &execution.unhandled_rejections {
        warn!(
            invocation = id,
            module = %execution.module,
            %reason,
            "promise rejected with no handler"
        );
    }
    if execution.dropped_output > 0 {
        warn!(
            invocation = id,
            dropped = execution.dropped_output,
            "output exceeded the sink cap and was truncated"
        );
    }
    execution
}

/// Blocking half of [`run`]: owns the engine for the whole invocation.
fn execute(
    module: &ScriptModule,
    request: &Request,
    id: u64,
    settings: &ExecutionSettings,
) -> Execution {
    let started = Instant::now();
    let mut execution = Execution::new(id, module.name(), module.contract());
    let deadline = Deadline::after(settings.timeout);
    let rejections = RejectionTracker::new();

    let (runtime, context) = match fresh_context(&settings.limits, &deadline, &rejections) {
        Ok(pair) => pair,
        Err(e) => {
            execution.fail(InvocationError::Engine(e.to_string()));
            return execution;
        }
    };

    context.with(|ctx| {
        let sink = OutputSink::with_limit(settings.limits.output);
        drive(&ctx, module, request, &sink, &deadline, &mut execution);
        execution.output = sink.snapshot();
        execution.dropped_output = sink.dropped();
    });
    execution.unhandled_rejections = rejections.take();

    // Teardown: the context and everything it allocated go here, before
    // the collector ever sees the execution.
    drop(context);
    drop(runtime);

    execution.elapsed = started.elapsed();
    execution
}

fn drive<'js>(
    ctx: &Ctx<'js>,
    module: &ScriptModule,
    request: &Request,
    sink: &OutputSink,
    deadline: &Deadline,
    execution: &mut Execution,
) {
    let engine = |e: rquickjs::Error| InvocationError::Engine(e.to_string());

    let surface = match Surface::install(ctx, sink) {
        Ok(surface) => surface,
        Err(e) => return execution.fail(engine(e)),
    };
    let contract = module.contract();
    let args = match HandlerArgs::marshal(ctx, &surface, contract, request) {
        Ok(args) => args,
        Err(e) => return execution.fail(engine(e)),
    };

    execution.transition(InvocationState::Running);

    if let Err(err) = ctx.eval::<(), _>(module.source()).catch(ctx) {
        return execution.fail(script_failure(err, deadline));
    }
    let entry = match entry_function(ctx, contract) {
        Ok(Some(entry)) => entry,
        Ok(None) => {
            return execution.fail(InvocationError::HandlerException(format!(
                "`{}` is no longer a function",
                contract.entry_name()
            )));
        }
        Err(e) => return execution.fail(engine(e)),
    };

    let result = match args.call(&entry).catch(ctx) {
        Ok(value) => value,
        Err(err) => return execution.fail(script_failure(err, deadline)),
    };
    let settled = match settle(ctx, result, deadline) {
        Settled::Value(value) => value,
        Settled::Threw(err) => return execution.fail(script_failure(err, deadline)),
        Settled::Stalled => {
            execution.stalled = true;
            return execution.fail(InvocationError::Timeout(deadline.budget()));
        }
        Settled::Expired => return execution.fail(InvocationError::Timeout(deadline.budget())),
    };

    if !drain(ctx, deadline) {
        return execution.fail(InvocationError::Timeout(deadline.budget()));
    }

    execution.returned = returned_body(ctx, &settled);
    if let Some(response) = args.response() {
        match ScriptResponse::extract(ctx, response) {
            Ok(response) => execution.response = Some(response),
            Err(message) => return execution.fail(InvocationError::HandlerException(message)),
        }
    }
    execution.transition(InvocationState::Completed);
}

enum Settled<'js> {
    Value(Value<'js>),
    Threw(CaughtError<'js>),
    Stalled,
    Expired,
}

/// Drive `result` to a settled value if it is a promise.
fn settle<'js>(ctx: &Ctx<'js>, result: Value<'js>, deadline: &Deadline) -> Settled<'js> {
    let Some(promise) = result.as_promise().cloned() else {
        return Settled::Value(result);
    };
    mark_handled(ctx, &result);
    loop {
        match promise.state() {
            PromiseState::Resolved | PromiseState::Rejected => {
                return match promise.result::<Value>() {
                    Some(outcome) => match outcome.catch(ctx) {
                        Ok(value) => Settled::Value(value),
                        Err(err) => Settled::Threw(err),
                    },
                    None => Settled::Stalled,
                };
            }
            PromiseState::Pending => {
                if deadline.expired() {
                    return Settled::Expired;
                }
                if !ctx.execute_pending_job() {
                    return Settled::Stalled;
                }
            }
        }
    }
}

/// Run queued jobs until the queue is empty. `false` if the deadline
/// passed first.
fn drain(ctx: &Ctx<'_>, deadline: &Deadline) -> bool {
    loop {
        if deadline.expired() {
            return false;
        }
        if !ctx.execute_pending_job() {
            return true;
        }
    }
}

/// Attach a no-op handler so the entry point's own rejection is reported
/// as a failure, not as an unhandled rejection.
fn mark_handled<'js>(ctx: &Ctx<'js>, promise: &Value<'js>) {
    let Some(object) = promise.as_object() else {
        return;
    };
    let attach = || -> rquickjs::Result<()> {
        let then: Function = object.get("then")?;
        let ignore = Function::new(ctx.clone(), || ())?;
        then.call::<_, Value>((This(object.clone()), ignore.clone(), ignore))?;
        Ok(())
    };
    if let Err(err) = attach().catch(ctx) {
        debug!(error = %err, "could not attach a handler to the entry promise");
    }
}

fn script_failure(err: CaughtError<'_>, deadline: &Deadline) -> InvocationError {
    if deadline.tripped() {
        InvocationError::Timeout(deadline.budget())
    } else {
        InvocationError::HandlerException(err.to_string())
    }
}
