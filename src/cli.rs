//! Command-line surface. Thin by design: every flag maps straight onto
//! engine or facade configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "kubewatch",
    about = "Live multi-context Kubernetes cluster observer for the terminal",
    version
)]
pub struct Args {
    /// Kubeconfig context to observe (default: last used, then current).
    #[arg(long)]
    pub context: Option<String>,

    /// Comma-separated contexts to observe side by side (multi-cluster mode).
    #[arg(long, value_delimiter = ',')]
    pub contexts: Vec<String>,

    /// Namespace to observe (default: all namespaces).
    #[arg(short = 'n', long)]
    pub namespace: Option<String>,

    /// Resource kind to show first (a registered definition name).
    #[arg(short = 'k', long, default_value = "pods")]
    pub kind: String,

    /// Path to the kubeconfig file (default: ~/.kube/config or $KUBECONFIG).
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Auto-refresh interval, e.g. "2s" or "500ms".
    #[arg(long, default_value = "2s", value_parser = humantime::parse_duration)]
    pub refresh_interval: Duration,
}

impl Args {
    /// Explicitly requested contexts: `--contexts` wins over `--context`.
    /// Empty means "fall back to the saved or current context".
    pub fn requested_contexts(&self) -> Vec<String> {
        if !self.contexts.is_empty() {
            self.contexts.clone()
        } else {
            self.context.clone().into_iter().collect()
        }
    }

    pub fn multi_context(&self) -> bool {
        self.contexts.len() > 1
    }
}
