//! ScriptModule — a validated handler script.
//!
//! Loading evaluates the script once in a throwaway context to surface
//! syntax and top-level reference errors and to detect the entry point.
//! Nothing from that context survives; each invocation evaluates the
//! source again in its own fresh context.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use kiln_core::HandlerContract;
use rquickjs::{CatchResultExt, Context, Runtime};

use crate::detect::{EntryPoint, detect};
use crate::error::{LoadError, LoadResult};
use crate::limiter::{Deadline, ResourceLimits};
use crate::rejections::RejectionTracker;
use crate::sink::OutputSink;
use crate::surface::Surface;

/// Options applied while validating a module.
#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    /// Use this contract instead of precedence-based detection.
    pub forced: Option<HandlerContract>,
    /// Caps for the validation context.
    pub limits: ResourceLimits,
    /// Budget for the module's top-level code.
    pub timeout: Duration,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            forced: None,
            limits: ResourceLimits::default(),
            timeout: crate::DEFAULT_TIMEOUT,
        }
    }
}

/// A handler script whose entry point has been detected.
///
/// Cheap to clone: the source is shared.
#[derive(Debug, Clone)]
pub struct ScriptModule {
    name: String,
    source: Arc<str>,
    entry: EntryPoint,
}

impl ScriptModule {
    /// Validate `source` and detect its entry point.
    pub fn from_source(
        name: &str,
        source: impl Into<Arc<str>>,
        options: &LoadOptions,
    ) -> LoadResult<Self> {
        let source = source.into();
        let deadline = Deadline::after(options.timeout);
        let rejections = RejectionTracker::new();
        let (_runtime, context) = fresh_context(&options.limits, &deadline, &rejections)
            .map_err(|e| LoadError::Engine(e.to_string()))?;

        let entry = context.with(|ctx| {
            let sink = OutputSink::with_limit(options.limits.output);
            Surface::install(&ctx, &sink).map_err(|e| LoadError::Engine(e.to_string()))?;

            if let Err(err) = ctx.eval::<(), _>(&*source).catch(&ctx) {
                if deadline.tripped() {
                    return Err(LoadError::Engine(format!(
                        "top-level code of `{name}` did not finish within {:?}",
                        options.timeout
                    )));
                }
                return Err(LoadError::ScriptSyntaxOrReference {
                    module: name.to_string(),
                    message: err.to_string(),
                });
            }
            while ctx.execute_pending_job() {
                if deadline.expired() {
                    break;
                }
            }
            for reason in rejections.take() {
                tracing::warn!(module = %name, %reason, "top-level code left a promise rejection unhandled");
            }
            if !sink.is_empty() {
                tracing::debug!(module = %name, bytes = sink.len(), "top-level code wrote output during load");
            }

            detect(&ctx, name, options.forced)
        })?;

        tracing::info!(module = %name, contract = %entry.contract, entry = entry.name(), "loaded script module");
        Ok(Self {
            name: name.to_string(),
            source,
            entry,
        })
    }

    /// Read and validate a script file.
    ///
    /// The module name defaults to the file stem.
    pub fn from_file(path: &Path, name: Option<&str>, options: &LoadOptions) -> LoadResult<Self> {
        let source = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "handler".to_string());
        let name = name.unwrap_or(&stem);
        tracing::debug!(module = %name, path = %path.display(), "read script module");
        Self::from_source(name, source, options)
    }

    /// The module name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn entry(&self) -> EntryPoint {
        self.entry
    }

    pub fn contract(&self) -> HandlerContract {
        self.entry.contract
    }
}

/// A new engine runtime and context with `limits`, `deadline` and
/// `rejections` installed.
///
/// Every load and every invocation gets its own pair; nothing is pooled.
pub(crate) fn fresh_context(
    limits: &ResourceLimits,
    deadline: &Deadline,
    rejections: &RejectionTracker,
) -> rquickjs::Result<(Runtime, Context)> {
    let runtime = Runtime::new()?;
    limits.apply(&runtime);
    deadline.install(&runtime);
    rejections.install(&runtime);
    let context = Context::full(&runtime)?;
    Ok((runtime, context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load(source: &str) -> LoadResult<ScriptModule> {
        ScriptModule::from_source("test", source, &LoadOptions::default())
    }

    #[test]
    fn loads_and_detects() {
        let module = load("async function handleRequest(req, res) { res.status = 204; }").unwrap();
        assert_eq!(module.name(), "test");
        assert_eq!(module.contract(), HandlerContract::TwoArg);
        assert!(module.source().contains("res.status"));
    }

    #[test]
    fn syntax_error_fails_load() {
        let err = load("function main( {").unwrap_err();
        assert!(matches!(err, LoadError::ScriptSyntaxOrReference { .. }), "{err}");
    }

    #[test]
    fn top_level_reference_error_fails_load() {
        let err = load("undefinedThing.call(); function main() {}").unwrap_err();
        match err {
            LoadError::ScriptSyntaxOrReference { module, message } => {
                assert_eq!(module, "test");
                assert!(message.contains("undefinedThing"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn no_entry_point_fails_load() {
        let err = load("function helper() {}").unwrap_err();
        assert!(matches!(err, LoadError::NoRecognizedEntryPoint { .. }));
    }

    #[test]
    fn runaway_top_level_code_is_cut_off() {
        let options = LoadOptions {
            timeout: Duration::from_millis(50),
            ..LoadOptions::default()
        };
        let err = ScriptModule::from_source("spin", "while (true) {}", &options).unwrap_err();
        assert!(matches!(err, LoadError::Engine(_)), "{err}");
    }

    #[test]
    fn forced_contract_is_honoured() {
        let options = LoadOptions {
            forced: Some(HandlerContract::ZeroArg),
            ..LoadOptions::default()
        };
        let module = ScriptModule::from_source(
            "both",
            "function main() {} function handleRequest(req, res) {}",
            &options,
        )
        .unwrap();
        assert_eq!(module.contract(), HandlerContract::ZeroArg);
    }

    #[test]
    fn from_file_uses_stem_as_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("greeter.js");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "function main() {{ write('hi'); }}").unwrap();

        let module = ScriptModule::from_file(&path, None, &LoadOptions::default()).unwrap();
        assert_eq!(module.name(), "greeter");
        assert_eq!(module.contract(), HandlerContract::ZeroArg);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = ScriptModule::from_file(
            Path::new("/nonexistent/kiln/handler.js"),
            None,
            &LoadOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }
}
