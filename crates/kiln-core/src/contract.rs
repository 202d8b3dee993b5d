//! Handler calling conventions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The calling convention a script module exposes.
///
/// Exactly one is selected per module, at load time. When a module
/// defines several recognized entry points the most specific wins:
/// [`TwoArg`](Self::TwoArg), then [`SingleArg`](Self::SingleArg),
/// then [`ZeroArg`](Self::ZeroArg).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandlerContract {
    /// `main()` — runs once per process start; output is printed text.
    ZeroArg,
    /// `handleBody(body)` — runs per request with the raw body bytes.
    SingleArg,
    /// `handleRequest(request, response)` — runs per request and mutates `response`.
    TwoArg,
}

impl HandlerContract {
    /// Detection order, most specific first.
    pub const PRECEDENCE: [HandlerContract; 3] = [
        HandlerContract::TwoArg,
        HandlerContract::SingleArg,
        HandlerContract::ZeroArg,
    ];

    /// Global callable name a script defines to expose this contract.
    pub fn entry_name(self) -> &'static str {
        match self {
            HandlerContract::ZeroArg => "main",
            HandlerContract::SingleArg => "handleBody",
            HandlerContract::TwoArg => "handleRequest",
        }
    }

    /// Number of parameters the entry point is called with.
    pub fn arity(self) -> u32 {
        match self {
            HandlerContract::ZeroArg => 0,
            HandlerContract::SingleArg => 1,
            HandlerContract::TwoArg => 2,
        }
    }

    /// Whether the handler runs per request rather than once per process.
    pub fn is_per_request(self) -> bool {
        !matches!(self, HandlerContract::ZeroArg)
    }

    pub fn label(self) -> &'static str {
        match self {
            HandlerContract::ZeroArg => "zero-arg",
            HandlerContract::SingleArg => "single-arg",
            HandlerContract::TwoArg => "two-arg",
        }
    }
}

impl fmt::Display for HandlerContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for HandlerContract {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zero-arg" | "zero" | "main" => Ok(HandlerContract::ZeroArg),
            "single-arg" | "single" | "body" => Ok(HandlerContract::SingleArg),
            "two-arg" | "two" | "request" => Ok(HandlerContract::TwoArg),
            other => Err(format!(
                "unknown handler contract `{other}` (expected zero-arg, single-arg or two-arg)"
            )),
        }
    }
}
