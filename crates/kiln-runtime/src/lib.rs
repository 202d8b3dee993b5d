//! kiln-runtime — sandboxed host for JavaScript handler scripts.
//!
//! Loads one script module, detects which calling convention it exposes,
//! and runs it once per request in a fresh QuickJS context. The runtime
//! manages:
//!
//! - **Loading**: evaluates the script once to catch syntax and top-level
//!   reference errors, then detects the entry point
//! - **API surface**: the only globals a script gets beyond the language
//!   builtins (`write`, `console`, `TextEncoder`, `TextDecoder`, `Uint8Array`)
//! - **Scheduling**: drives async handlers to a terminal state under a
//!   wall-clock deadline, with heap and stack caps per invocation
//! - **Rejections**: promises rejected with no handler are logged per
//!   invocation
//! - **Collection**: builds the outbound response from the response value,
//!   the return value, or captured output
//!
//! # Architecture
//!
//! ```text
//! Host
//!   ├── ScriptModule (source + detected EntryPoint)
//!   ├── InvocationSlots (concurrency cap)
//!   └── per invocation, on a blocking worker:
//!       ├── fresh rquickjs Runtime + Context (limits, deadline)
//!       ├── Surface + OutputSink
//!       ├── HandlerArgs (marshalled request)
//!       └── Execution ──▶ collector ──▶ Response
//! ```

pub mod codec;
pub mod collector;
pub mod detect;
pub mod error;
pub mod limiter;
pub mod marshal;
pub mod module;
pub mod rejections;
pub mod scheduler;
pub mod sink;
pub mod slots;
pub mod surface;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use kiln_core::{ConfigError, HandlerContract, KilnConfig, Request, Response};

pub use codec::{decode_bytes, encode_text};
pub use detect::EntryPoint;
pub use error::{InvocationError, LoadError, LoadResult};
pub use limiter::ResourceLimits;
pub use module::{LoadOptions, ScriptModule};
pub use rejections::RejectionTracker;
pub use scheduler::{Execution, ExecutionSettings, InvocationState};
pub use sink::OutputSink;
pub use slots::{InvocationSlots, Slot};

/// Wall-clock budget per invocation unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest wall-clock budget a host accepts.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Reject a timeout above [`MAX_TIMEOUT`], naming `field` in the error.
pub fn bounded_timeout(field: &'static str, timeout: Duration) -> Result<Duration, ConfigError> {
    if timeout > MAX_TIMEOUT {
        return Err(ConfigError::InvalidValue {
            field,
            value: format!("{timeout:?} is above the {MAX_TIMEOUT:?} maximum"),
        });
    }
    Ok(timeout)
}

/// Host settings, usually resolved from `kiln.toml`.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Module name for logs. Defaults to the script's file stem.
    pub name: Option<String>,
    /// Force a contract instead of detecting one.
    pub contract: Option<HandlerContract>,
    pub timeout: Duration,
    pub limits: ResourceLimits,
    pub max_concurrent: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            name: None,
            contract: None,
            timeout: DEFAULT_TIMEOUT,
            limits: ResourceLimits::default(),
            max_concurrent: slots::DEFAULT_MAX_CONCURRENT,
        }
    }
}

impl HostConfig {
    /// Resolve defaults for every field `config` leaves out.
    pub fn from_kiln_config(config: &KilnConfig) -> Result<Self, ConfigError> {
        let defaults = ResourceLimits::default();
        Ok(Self {
            name: Some(config.module_name()),
            contract: config.handler.contract,
            timeout: bounded_timeout(
                "limits.timeout",
                config.timeout()?.unwrap_or(DEFAULT_TIMEOUT),
            )?,
            limits: ResourceLimits {
                memory: config.memory_limit()?.unwrap_or(defaults.memory),
                stack: config.stack_limit()?.unwrap_or(defaults.stack),
                output: config.output_limit()?.unwrap_or(defaults.output),
            },
            max_concurrent: config
                .max_concurrent()
                .unwrap_or(slots::DEFAULT_MAX_CONCURRENT),
        })
    }

    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            forced: self.contract,
            limits: self.limits,
            timeout: self.timeout,
        }
    }

    fn execution_settings(&self) -> ExecutionSettings {
        ExecutionSettings {
            timeout: self.timeout,
            limits: self.limits,
        }
    }
}

/// A loaded handler, ready to be invoked concurrently.
pub struct Host {
    module: Arc<ScriptModule>,
    settings: ExecutionSettings,
    slots: InvocationSlots,
    next_id: AtomicU64,
}

impl Host {
    /// Load and validate the script at `path`.
    pub fn load(path: &Path, config: &HostConfig) -> LoadResult<Self> {
        let module = ScriptModule::from_file(path, config.name.as_deref(), &config.load_options())?;
        Ok(Self::with_module(module, config))
    }

    /// Load and validate an in-memory script.
    pub fn from_source(name: &str, source: &str, config: &HostConfig) -> LoadResult<Self> {
        let module = ScriptModule::from_source(name, source, &config.load_options())?;
        Ok(Self::with_module(module, config))
    }

    fn with_module(module: ScriptModule, config: &HostConfig) -> Self {
        Self {
            module: Arc::new(module),
            settings: config.execution_settings(),
            slots: InvocationSlots::new(config.max_concurrent),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn module(&self) -> &ScriptModule {
        &self.module
    }

    /// The contract chosen at load time.
    pub fn contract(&self) -> HandlerContract {
        self.module.contract()
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    pub fn slots(&self) -> &InvocationSlots {
        &self.slots
    }

    /// Run one invocation, waiting for a free slot, and collect its response.
    ///
    /// Script failures become a 500 response; this never errors.
    pub async fn invoke(&self, request: Request) -> Response {
        collector::collect(self.execute(request).await)
    }

    /// Like [`invoke`](Self::invoke), but `None` when every slot is busy.
    pub async fn try_invoke(&self, request: Request) -> Option<Response> {
        let slot = self.slots.try_acquire()?;
        Some(collector::collect(self.run(request, slot).await))
    }

    /// Run one invocation and return the raw execution record.
    pub async fn execute(&self, request: Request) -> Execution {
        let slot = self.slots.acquire().await;
        self.run(request, slot).await
    }

    /// The process-start invocation: the handler sees an empty `GET /`.
    ///
    /// This is the only way a zero-arg module ever runs.
    pub async fn startup(&self) -> Response {
        self.invoke(Request::empty()).await
    }

    async fn run(&self, request: Request, slot: Slot) -> Execution {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        scheduler::run(Arc::clone(&self.module), request, id, self.settings, slot).await
    }
}
