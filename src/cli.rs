//! Command line interface.

use crate::config::{Config, TargetConfig};
use crate::encode::Encoding;
use crate::error::Result;
use crate::transport::{KubectlTarget, SshTarget};
use crate::watcher::RenamePolicy;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "podsync", version)]
/// Mirror a local directory into a running container or remote host
pub struct Cli {
    /// Local directory to watch
    #[arg(long, value_name = "DIR")]
    pub source: Option<PathBuf>,

    /// Absolute destination directory on the remote side
    #[arg(long, value_name = "DIR")]
    pub dest: Option<String>,

    /// Pod to exec into
    #[arg(long, conflicts_with_all = ["ssh", "local"])]
    pub pod: Option<String>,

    /// Namespace of the pod
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Container within the pod
    #[arg(short, long)]
    pub container: Option<String>,

    /// Path to the kubeconfig file
    #[arg(long, value_name = "FILE")]
    pub kubeconfig: Option<PathBuf>,

    /// kubeconfig context to use
    #[arg(long)]
    pub context: Option<String>,

    /// Sync over ssh to [user@]host[:port]
    #[arg(long, value_name = "HOST", conflicts_with = "local")]
    pub ssh: Option<String>,

    /// Identity file for ssh
    #[arg(long, value_name = "FILE", requires = "ssh")]
    pub identity: Vec<PathBuf>,

    /// Run remote commands on this machine (dest is a local directory)
    #[arg(long)]
    pub local: bool,

    /// Quiet period per path before syncing, in milliseconds
    #[arg(long, value_name = "MS")]
    pub debounce_ms: Option<u64>,

    /// Timeout for each remote command, in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Timeout for the initial full-tree transfer, in seconds
    #[arg(long, value_name = "SECS")]
    pub bulk_timeout: Option<u64>,

    /// Content encoding for inline writes (base64, printf)
    #[arg(long)]
    pub encoding: Option<Encoding>,

    /// What a rename does to the new name (mirror, delete-only)
    #[arg(long)]
    pub rename_policy: Option<RenamePolicy>,

    /// Maximum remote operations in flight
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Skip the initial full-tree transfer
    #[arg(long)]
    pub no_initial_sync: bool,

    /// Create the remote destination if it doesn't exist
    #[arg(long)]
    pub create_remote_root: bool,

    /// Configuration file (default: $XDG_CONFIG_HOME/podsync/config.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Cli {
    /// Default log directive when RUST_LOG is unset.
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Load the configuration file and layer the flags on top.
    pub fn resolve_config(&self) -> Result<Config> {
        let mut config = Config::discover(self.config.as_deref())?;
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&self, config: &mut Config) {
        if let Some(source) = &self.source {
            config.source = source.clone();
        }
        if let Some(dest) = &self.dest {
            config.dest = dest.clone();
        }
        if let Some(ms) = self.debounce_ms {
            config.debounce_ms = ms;
        }
        if let Some(secs) = self.timeout {
            config.exec_timeout_secs = secs;
        }
        if let Some(secs) = self.bulk_timeout {
            config.bulk_timeout_secs = secs;
        }
        if let Some(encoding) = self.encoding {
            config.encoding = encoding;
        }
        if let Some(policy) = self.rename_policy {
            config.rename_policy = policy;
        }
        if let Some(jobs) = self.jobs {
            config.max_parallel = jobs;
        }
        if self.no_initial_sync {
            config.initial_sync = false;
        }
        if self.create_remote_root {
            config.create_remote_root = true;
        }

        config.target = self.target(config.target.take());
    }

    fn target(&self, existing: Option<TargetConfig>) -> Option<TargetConfig> {
        if self.local {
            return Some(TargetConfig::Local);
        }

        if let Some(spec) = &self.ssh {
            let mut target = SshTarget::parse(spec);
            target.identity_file = self.identity.clone();
            return Some(TargetConfig::Ssh(target));
        }

        let mut target = match (existing, &self.pod) {
            (Some(TargetConfig::Kubectl(t)), _) => t,
            (_, Some(pod)) => KubectlTarget::new(pod.clone(), "default"),
            (other, None) => return other,
        };
        if let Some(pod) = &self.pod {
            target.pod = pod.clone();
        }
        if let Some(namespace) = &self.namespace {
            target.namespace = namespace.clone();
        }
        if let Some(container) = &self.container {
            target.container = Some(container.clone());
        }
        if let Some(kubeconfig) = &self.kubeconfig {
            target.kubeconfig = Some(kubeconfig.clone());
        }
        if let Some(context) = &self.context {
            target.context = Some(context.clone());
        }
        Some(TargetConfig::Kubectl(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("podsync").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_kubectl_flags() {
        let cli = parse(&[
            "--source", "/ws", "--dest", "/app", "--pod", "web-0", "-n", "dev",
            "--kubeconfig", "/tmp/kc",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config);

        assert_eq!(config.source, PathBuf::from("/ws"));
        assert_eq!(config.dest, "/app");
        match config.target.unwrap() {
            TargetConfig::Kubectl(t) => {
                assert_eq!(t.pod, "web-0");
                assert_eq!(t.namespace, "dev");
                assert_eq!(t.kubeconfig, Some(PathBuf::from("/tmp/kc")));
            }
            other => panic!("unexpected target {:?}", other),
        }
    }

    #[test]
    fn test_flags_override_file_target() {
        let mut config = Config::parse(
            "dest = \"/app\"\n[target]\nkind = \"kubectl\"\npod = \"web-0\"\nnamespace = \"prod\"\n",
        )
        .unwrap();
        parse(&[
            "-n", "staging", "--encoding", "printf", "--no-initial-sync", "--bulk-timeout", "1800",
        ])
        .apply(&mut config);

        assert_eq!(config.encoding, Encoding::Printf);
        assert_eq!(config.bulk_timeout_secs, 1800);
        assert!(!config.initial_sync);
        match config.target.unwrap() {
            TargetConfig::Kubectl(t) => {
                assert_eq!(t.pod, "web-0");
                assert_eq!(t.namespace, "staging");
            }
            other => panic!("unexpected target {:?}", other),
        }
    }

    #[test]
    fn test_ssh_and_local_targets() {
        let mut config = Config::default();
        parse(&["--ssh", "deploy@box:2222", "--identity", "/k"]).apply(&mut config);
        match config.target.take().unwrap() {
            TargetConfig::Ssh(t) => {
                assert_eq!(t.user, "deploy");
                assert_eq!(t.port, 2222);
                assert_eq!(t.identity_file, vec![PathBuf::from("/k")]);
            }
            other => panic!("unexpected target {:?}", other),
        }

        parse(&["--local"]).apply(&mut config);
        assert_eq!(config.target, Some(TargetConfig::Local));
    }

    #[test]
    fn test_conflicting_targets_rejected() {
        assert!(Cli::try_parse_from(["podsync", "--pod", "p", "--local"]).is_err());
        assert!(Cli::try_parse_from(["podsync", "--ssh", "h", "--local"]).is_err());
    }

    #[test]
    fn test_log_level() {
        assert_eq!(parse(&[]).log_level(), "info");
        assert_eq!(parse(&["-vv"]).log_level(), "trace");
        assert_eq!(parse(&["-q"]).log_level(), "warn");
    }
}
