//! kiln-trigger — HTTP trigger for Kiln.
//!
//! Bridges inbound HTTP requests to a loaded handler script. Each request
//! becomes one invocation on the [`kiln_runtime::Host`], which runs it in a
//! fresh context and returns the collected response.
//!
//! # Architecture
//!
//! ```text
//! HTTP client
//!   │
//!   ▼
//! hyper server
//!   │
//!   ├── Collect body (≤ max_body, else 413)
//!   ├── Convert http::Request → kiln_core::Request
//!   ├── Host::try_invoke (503 when every slot is busy)
//!   ├── Convert kiln_core::Response → http::Response
//!   │
//!   ▼
//! HTTP response
//! ```

pub mod convert;
pub mod handler;

pub use handler::{DEFAULT_MAX_BODY, HttpTrigger, RequestHandler, handle, host_handler, serve_listener};
