pub mod check;
pub mod run;
pub mod serve;

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use kiln_core::{HandlerContract, KilnConfig};
use kiln_runtime::{Host, HostConfig};

const DEFAULT_CONFIG: &str = "kiln.toml";

/// Work out which config applies.
///
/// An explicit `--config` wins, then `./kiln.toml`, then a bare script.
/// A script argument always overrides `handler.script`.
pub fn resolve_config(
    script: Option<PathBuf>,
    config: Option<PathBuf>,
    contract: Option<HandlerContract>,
) -> anyhow::Result<KilnConfig> {
    let config_path = config.or_else(|| {
        let default = PathBuf::from(DEFAULT_CONFIG);
        default.is_file().then_some(default)
    });

    let mut resolved = match (config_path, script.clone()) {
        (Some(path), _) => KilnConfig::from_file(&path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        (None, Some(script)) => KilnConfig::for_script(script),
        (None, None) => bail!("no script given and no {DEFAULT_CONFIG} in the current directory"),
    };

    if let Some(script) = script {
        resolved.handler.script = script;
    }
    if contract.is_some() {
        resolved.handler.contract = contract;
    }
    Ok(resolved)
}

/// Load the configured script into a host.
pub fn load_host(config: &KilnConfig, host_config: &HostConfig) -> anyhow::Result<Host> {
    let script: &Path = &config.handler.script;
    Host::load(script, host_config).with_context(|| format!("failed to load {}", script.display()))
}
