//! kiln-core — values shared by every Kiln crate.
//!
//! Nothing in here touches the script engine. The runtime, the HTTP
//! trigger and the CLI all speak in terms of these types:
//!
//! - [`Request`] / [`Response`] / [`HeaderMap`]: transport-neutral HTTP values
//! - [`HandlerContract`]: the three calling conventions a script may expose
//! - [`KilnConfig`]: the `kiln.toml` file

pub mod config;
pub mod contract;
pub mod error;
pub mod http;

pub use config::KilnConfig;
pub use contract::HandlerContract;
pub use error::ConfigError;
pub use http::{HeaderMap, Request, Response};
