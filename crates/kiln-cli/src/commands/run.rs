use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, bail};
use bytes::Bytes;
use kiln_core::config::parse_duration;
use kiln_core::{HandlerContract, HeaderMap, Request, Response};
use kiln_runtime::{HostConfig, bounded_timeout};

use super::{load_host, resolve_config};

/// Request flags for `kiln run`.
pub struct RequestArgs {
    pub method: String,
    pub uri: String,
    pub body: Option<String>,
    pub headers: Vec<String>,
}

impl RequestArgs {
    fn into_request(self) -> anyhow::Result<Request> {
        let mut headers = HeaderMap::new();
        for raw in &self.headers {
            let (name, value) = parse_header(raw)?;
            headers.append(name, value);
        }
        let body = self.body.map(Bytes::from).unwrap_or_default();
        Ok(Request::new(self.method.to_uppercase(), self.uri, headers, body))
    }
}

fn parse_header(raw: &str) -> anyhow::Result<(&str, &str)> {
    let Some((name, value)) = raw.split_once(':') else {
        bail!("header `{raw}` is not in `Name: value` form");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("header `{raw}` has an empty name");
    }
    Ok((name, value.trim()))
}

pub async fn run(
    script: Option<PathBuf>,
    config: Option<PathBuf>,
    contract: Option<HandlerContract>,
    request: RequestArgs,
    timeout: Option<&str>,
) -> anyhow::Result<()> {
    let config = resolve_config(script, config, contract)?;
    let mut host_config = HostConfig::from_kiln_config(&config)?;
    if let Some(raw) = timeout {
        let timeout =
            parse_duration(raw).with_context(|| format!("invalid --timeout `{raw}`"))?;
        host_config.timeout = bounded_timeout("--timeout", timeout)?;
    }
    let host = load_host(&config, &host_config)?;

    let response = if host.contract().is_per_request() {
        host.invoke(request.into_request()?).await
    } else {
        host.startup().await
    };
    print_response(&response)
}

fn print_response(response: &Response) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();
    writeln!(out, "status: {}", response.status())?;
    for (name, values) in response.headers().iter() {
        for value in values {
            writeln!(out, "{name}: {value}")?;
        }
    }
    writeln!(out)?;
    out.write_all(response.body())?;
    if !response.body().ends_with(b"\n") && !response.body().is_empty() {
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}
