//! Response collector — turns a finished execution into the transport response.
//!
//! | contract     | status              | headers          | body |
//! |--------------|---------------------|------------------|------|
//! | `zero-arg`   | 200                 | none             | output sink |
//! | `single-arg` | 200                 | none             | output sink |
//! | `two-arg`    | `response.status`   | `response.headers` | `response.body`, else the return value, else the output sink |
//!
//! Failed and timed-out invocations always produce [`FAILURE_STATUS`] with
//! a small JSON diagnostic. Engine messages stay in the logs.

use bytes::Bytes;
use kiln_core::{HandlerContract, HeaderMap, Response};
use serde_json::json;

use crate::scheduler::{Execution, InvocationState};

/// Status for any invocation that did not complete.
pub const FAILURE_STATUS: u16 = 500;

/// Build the response for `execution`.
pub fn collect(execution: Execution) -> Response {
    if execution.state != InvocationState::Completed {
        return failure(&execution);
    }
    match execution.contract {
        HandlerContract::ZeroArg | HandlerContract::SingleArg => {
            Response::new(200, HeaderMap::new(), execution.output)
        }
        HandlerContract::TwoArg => {
            let script = execution.response.unwrap_or_default();
            let body = script
                .body
                .or(execution.returned)
                .unwrap_or(execution.output);
            Response::new(script.status, script.headers, body)
        }
    }
}

/// The diagnostic response for a failed or timed-out invocation.
pub fn failure(execution: &Execution) -> Response {
    let reason = match execution.state {
        InvocationState::TimedOut => "handler_timed_out",
        _ => "handler_failed",
    };
    let body = json!({ "error": reason, "invocation": execution.id }).to_string();
    let mut headers = HeaderMap::new();
    headers.append("content-type", "application/json");
    Response::new(FAILURE_STATUS, headers, Bytes::from(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvocationError;
    use crate::marshal::ScriptResponse;
    use std::time::Duration;

    fn completed(contract: HandlerContract, output: &[u8]) -> Execution {
        let mut execution = Execution::new(7, "test", contract);
        execution.state = InvocationState::Completed;
        execution.output = output.to_vec();
        execution
    }

    #[test]
    fn zero_and_single_arg_echo_the_sink() {
        for contract in [HandlerContract::ZeroArg, HandlerContract::SingleArg] {
            let mut execution = completed(contract, b"printed\n");
            execution.returned = Some(b"ignored".to_vec());
            let response = collect(execution);
            assert_eq!(response.status(), 200);
            assert!(response.headers().is_empty());
            assert_eq!(response.body().as_ref(), b"printed\n");
        }
    }

    #[test]
    fn two_arg_status_without_body_falls_back_to_sink() {
        let mut execution = completed(HandlerContract::TwoArg, b"logged");
        execution.response = Some(ScriptResponse {
            status: 418,
            ..ScriptResponse::default()
        });
        let response = collect(execution);
        assert_eq!(response.status(), 418);
        assert_eq!(response.body().as_ref(), b"logged");
    }

    #[test]
    fn two_arg_without_output_is_empty() {
        let mut execution = completed(HandlerContract::TwoArg, b"");
        execution.response = Some(ScriptResponse {
            status: 418,
            ..ScriptResponse::default()
        });
        let response = collect(execution);
        assert_eq!(response.status(), 418);
        assert!(response.body().is_empty());
    }

    #[test]
    fn two_arg_body_precedence() {
        let mut execution = completed(HandlerContract::TwoArg, b"sink");
        execution.returned = Some(b"returned".to_vec());
        execution.response = Some(ScriptResponse::default());
        assert_eq!(collect(execution.clone()).body().as_ref(), b"returned");

        execution.response = Some(ScriptResponse {
            body: Some(b"explicit".to_vec()),
            ..ScriptResponse::default()
        });
        assert_eq!(collect(execution).body().as_ref(), b"explicit");
    }

    #[test]
    fn two_arg_headers_are_forwarded() {
        let mut execution = completed(HandlerContract::TwoArg, b"");
        let mut headers = HeaderMap::new();
        headers.append("x-handler", "kiln");
        execution.response = Some(ScriptResponse {
            headers,
            ..ScriptResponse::default()
        });
        let response = collect(execution);
        assert_eq!(response.headers().get("x-handler"), Some("kiln"));
    }

    #[test]
    fn failure_hides_engine_text() {
        let mut execution = Execution::new(42, "test", HandlerContract::TwoArg);
        execution.fail(InvocationError::HandlerException(
            "ReferenceError: secret_internal is not defined".into(),
        ));
        execution.response = Some(ScriptResponse {
            status: 201,
            ..ScriptResponse::default()
        });
        let response = collect(execution);
        assert_eq!(response.status(), 500);
        assert_eq!(response.headers().get("content-type"), Some("application/json"));
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["error"], "handler_failed");
        assert_eq!(body["invocation"], 42);
        assert!(!String::from_utf8_lossy(response.body()).contains("secret_internal"));
    }

    #[test]
    fn timeout_is_reported_distinctly() {
        let mut execution = Execution::new(3, "test", HandlerContract::ZeroArg);
        execution.fail(InvocationError::Timeout(Duration::from_millis(10)));
        let response = collect(execution);
        assert_eq!(response.status(), FAILURE_STATUS);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["error"], "handler_timed_out");
    }
}
