use std::path::PathBuf;

use kiln_core::HandlerContract;
use kiln_runtime::HostConfig;

use super::{load_host, resolve_config};

pub fn check(
    script: Option<PathBuf>,
    config: Option<PathBuf>,
    contract: Option<HandlerContract>,
) -> anyhow::Result<()> {
    let config = resolve_config(script, config, contract)?;
    let host_config = HostConfig::from_kiln_config(&config)?;
    let host = load_host(&config, &host_config)?;

    let entry = host.module().entry();
    println!("✓ {} is valid", config.handler.script.display());
    println!("  module:   {}", host.module().name());
    println!("  contract: {} (`{}`)", entry.contract, entry.name());
    if let Some(declared) = entry.declared_arity {
        println!("  declared parameters: {declared}");
    }
    if !entry.contract.is_per_request() {
        println!("  note: zero-arg modules run once at process start and cannot be served");
    }
    Ok(())
}
