//! `kubectl exec` launcher for a running pod.

use super::RemoteCommand;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::process::Command;

/// Identity of the pod commands run in. Authentication stays with kubectl
/// and the kubeconfig it reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubectlTarget {
    pub pod: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,
    #[serde(default)]
    pub context: Option<String>,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl KubectlTarget {
    pub fn new(pod: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            pod: pod.into(),
            namespace: namespace.into(),
            container: None,
            kubeconfig: None,
            context: None,
        }
    }

    /// Arguments passed to kubectl, ending with the remote argv.
    pub fn args(&self, remote: &RemoteCommand) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(kubeconfig) = &self.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(kubeconfig.to_string_lossy().into_owned());
        }
        if let Some(context) = &self.context {
            args.push("--context".to_string());
            args.push(context.clone());
        }

        args.push("exec".to_string());
        if remote.stdin.is_some() {
            args.push("-i".to_string());
        }
        args.push("-n".to_string());
        args.push(self.namespace.clone());
        args.push(self.pod.clone());
        if let Some(container) = &self.container {
            args.push("-c".to_string());
            args.push(container.clone());
        }

        // kubectl forwards argv verbatim, no quoting needed
        args.push("--".to_string());
        args.extend(remote.argv.iter().cloned());
        args
    }

    pub fn command(&self, remote: &RemoteCommand) -> Command {
        let mut cmd = Command::new("kubectl");
        cmd.args(self.args(remote));
        cmd
    }

    /// kubectl reports a failed remote process as
    /// "command terminated with exit code N"; anything else nonzero is
    /// kubectl itself failing to reach the pod.
    pub fn channel_fault(&self, status: Option<i32>, stderr: &str) -> Option<String> {
        if status.is_none() {
            return Some("kubectl terminated by signal".to_string());
        }
        if stderr.contains("command terminated with exit code") {
            return None;
        }
        let first = stderr.lines().find(|l| !l.trim().is_empty())?.trim();
        let lower = first.to_ascii_lowercase();
        if lower.starts_with("error from server")
            || lower.starts_with("error:")
            || lower.starts_with("unable to connect")
            || lower.starts_with("the connection to the server")
            || lower.contains("not found")
        {
            Some(first.to_string())
        } else {
            None
        }
    }

    pub fn describe(&self) -> String {
        match &self.container {
            Some(c) => format!("pod {}/{} ({})", self.namespace, self.pod, c),
            None => format!("pod {}/{}", self.namespace, self.pod),
        }
    }
}
