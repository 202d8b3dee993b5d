//! Unhandled promise rejections.
//!
//! QuickJS reports a rejection that has no handler when it happens, and
//! again if a handler is attached later. Whatever is still unhandled when
//! an invocation ends is reported in its logs, never in a response.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rquickjs::{Ctx, Exception, Value};

/// Reasons of rejected promises nobody has handled yet.
///
/// Cloning shares the list, so the engine callback and the scheduler see
/// the same entries.
#[derive(Debug, Clone, Default)]
pub struct RejectionTracker {
    pending: Arc<Mutex<Vec<String>>>,
}

impl RejectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install this tracker as the engine's rejection callback.
    pub fn install(&self, rt: &rquickjs::Runtime) {
        let tracker = self.clone();
        rt.set_host_promise_rejection_tracker(Some(Box::new(
            move |_ctx: Ctx<'_>, _promise: Value<'_>, reason: Value<'_>, is_handled: bool| {
                tracker.record(describe(&reason), is_handled);
            },
        )));
    }

    fn record(&self, reason: String, is_handled: bool) {
        let mut pending = self.lock();
        if is_handled {
            if let Some(index) = pending.iter().position(|r| *r == reason) {
                pending.remove(index);
            }
        } else {
            pending.push(reason);
        }
    }

    /// Remove and return the rejections still unhandled.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Text for a rejection reason. Runs no script code.
fn describe(reason: &Value<'_>) -> String {
    if let Some(text) = reason.as_string() {
        return text
            .to_string()
            .unwrap_or_else(|_| "<non-utf8 string>".to_string());
    }
    if let Ok(object) = reason.clone().try_into_object() {
        if let Some(message) = Exception::from_object(object).and_then(|e| e.message()) {
            return message;
        }
    }
    format!("<{:?}>", reason.type_of())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejections_after(source: &str) -> Vec<String> {
        let rt = rquickjs::Runtime::new().unwrap();
        let tracker = RejectionTracker::new();
        tracker.install(&rt);
        let context = rquickjs::Context::full(&rt).unwrap();
        context.with(|ctx| {
            ctx.eval::<(), _>(source).unwrap();
            while ctx.execute_pending_job() {}
        });
        tracker.take()
    }

    #[test]
    fn unhandled_rejection_is_recorded() {
        let pending = rejections_after("Promise.reject(new Error('lost'));");
        assert_eq!(pending, vec!["lost".to_string()]);
    }

    #[test]
    fn string_reasons_are_kept_verbatim() {
        let pending = rejections_after("Promise.reject('plain');");
        assert_eq!(pending, vec!["plain".to_string()]);
    }

    #[test]
    fn late_handler_clears_the_entry() {
        let pending = rejections_after(
            "const p = Promise.reject(new Error('late')); Promise.resolve().then(() => p.catch(() => {}));",
        );
        assert!(pending.is_empty(), "{pending:?}");
    }

    #[test]
    fn handled_rejection_is_not_recorded() {
        let pending = rejections_after("Promise.reject(new Error('seen')).catch(() => {});");
        assert!(pending.is_empty(), "{pending:?}");
    }

    #[test]
    fn take_empties_the_list() {
        let tracker = RejectionTracker::new();
        tracker.record("a".into(), false);
        assert_eq!(tracker.take(), vec!["a".to_string()]);
        assert!(tracker.take().is_empty());
    }
}
