//! Kubeconfig plumbing: per-context client construction and context
//! enumeration, plus the remembered-context state file.

use std::path::{Path, PathBuf};

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

use super::facade::FacadeError;

fn read_kubeconfig(path: Option<&Path>) -> Result<Kubeconfig, FacadeError> {
    let result = match path {
        Some(p) => Kubeconfig::read_from(p),
        None => Kubeconfig::read(),
    };
    result.map_err(|err| FacadeError::Kubeconfig(err.to_string()))
}

/// Build a client bound to a named kubeconfig context.
/// Returns a descriptive error if the context is missing or unreachable.
pub async fn build_client_for_context(
    context: &str,
    kubeconfig: Option<&Path>,
) -> Result<Client, FacadeError> {
    let kc = read_kubeconfig(kubeconfig)?;
    let options = KubeConfigOptions {
        context: Some(context.to_string()),
        ..Default::default()
    };
    let config = Config::from_custom_kubeconfig(kc, &options)
        .await
        .map_err(|err| FacadeError::Kubeconfig(err.to_string()))?;
    debug!(context, "built client");
    Client::try_from(config).map_err(FacadeError::Api)
}

/// All context names in the kubeconfig, in file order.
pub fn list_contexts(kubeconfig: Option<&Path>) -> Vec<String> {
    read_kubeconfig(kubeconfig)
        .map(|cfg| cfg.contexts.iter().map(|c| c.name.clone()).collect())
        .unwrap_or_default()
}

/// The kubeconfig's current-context, if set.
pub fn current_context(kubeconfig: Option<&Path>) -> Option<String> {
    read_kubeconfig(kubeconfig).ok().and_then(|cfg| cfg.current_context)
}

// ─── Remembered context ───────────────────────────────────────────────────────

fn state_file() -> Option<PathBuf> {
    dirs::state_dir()
        .or_else(dirs::config_dir)
        .map(|dir| dir.join("kubewatch").join("last-context"))
}

/// The context the user last observed, restored on startup.
pub fn load_last_context() -> Option<String> {
    let path = state_file()?;
    let text = std::fs::read_to_string(path).ok()?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Persist the active context for the next run. Failures are ignored; this
/// is a convenience, not state the tool depends on.
pub fn save_last_context(context: &str) {
    let Some(path) = state_file() else { return };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(path, context);
}
