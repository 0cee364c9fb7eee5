//! Session configuration, read from TOML and overridden by the CLI.

use crate::bulk::DEFAULT_BULK_TIMEOUT;
use crate::debounce::DEFAULT_WINDOW;
use crate::encode::{ContentEncoder, Encoding, DEFAULT_INLINE_LIMIT};
use crate::engine::DEFAULT_MAX_PARALLEL;
use crate::error::{Result, SyncError};
use crate::path::{PathTranslator, RemotePath};
use crate::transport::{KubectlTarget, Launcher, SshTarget};
use crate::watcher::RenamePolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "config.toml";

const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 30;

/// Where remote commands run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TargetConfig {
    Kubectl(KubectlTarget),
    Ssh(SshTarget),
    Local,
}

impl TargetConfig {
    pub fn launcher(&self) -> Launcher {
        match self {
            TargetConfig::Kubectl(target) => Launcher::Kubectl(target.clone()),
            TargetConfig::Ssh(target) => Launcher::Ssh(target.clone()),
            TargetConfig::Local => Launcher::Local,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local directory to mirror
    pub source: PathBuf,

    /// Absolute directory on the remote side
    pub dest: String,

    pub target: Option<TargetConfig>,

    pub debounce_ms: u64,

    /// Upper bound for any single remote command
    pub exec_timeout_secs: u64,

    /// Upper bound for the initial whole-tree extract
    pub bulk_timeout_secs: u64,

    pub encoding: Encoding,

    /// Encoded payloads above this many bytes go over stdin as an archive
    pub inline_limit: usize,

    pub max_file_size: Option<u64>,

    pub rename_policy: RenamePolicy,

    pub max_parallel: usize,

    /// Push the whole tree once before watching
    pub initial_sync: bool,

    pub create_remote_root: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: PathBuf::from("."),
            dest: String::new(),
            target: None,
            debounce_ms: DEFAULT_WINDOW.as_millis() as u64,
            exec_timeout_secs: DEFAULT_EXEC_TIMEOUT_SECS,
            bulk_timeout_secs: DEFAULT_BULK_TIMEOUT.as_secs(),
            encoding: Encoding::default(),
            inline_limit: DEFAULT_INLINE_LIMIT,
            max_file_size: None,
            rename_policy: RenamePolicy::default(),
            max_parallel: DEFAULT_MAX_PARALLEL,
            initial_sync: true,
            create_remote_root: false,
        }
    }
}

impl Config {
    /// `$XDG_CONFIG_HOME/podsync/config.toml` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("podsync").join(CONFIG_FILE))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!(
                "Failed to read configuration from {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
            .map_err(|e| SyncError::Config(format!("{} ({})", e, path.display())))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SyncError::Config(e.to_string()))
    }

    /// Load an explicitly named file, else the default file if one exists,
    /// else built-in defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => {
                tracing::debug!(path = %path.display(), "Using configuration file");
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(SyncError::Config(msg.to_string()));

        if self.dest.is_empty() {
            return invalid("Remote destination is required (--dest)");
        }
        if !self.dest.starts_with('/') {
            return Err(SyncError::Config(format!(
                "Remote destination must be absolute, got '{}'",
                self.dest
            )));
        }
        if self.exec_timeout_secs == 0 {
            return invalid("exec_timeout_secs must be greater than zero");
        }
        if self.bulk_timeout_secs == 0 {
            return invalid("bulk_timeout_secs must be greater than zero");
        }
        if self.max_parallel == 0 {
            return invalid("max_parallel must be at least 1");
        }
        if self.inline_limit == 0 {
            return invalid("inline_limit must be greater than zero");
        }

        match &self.target {
            None => invalid("No remote target configured (--pod, --ssh or --local)"),
            Some(TargetConfig::Kubectl(t)) if t.pod.is_empty() => invalid("Pod name is empty"),
            Some(TargetConfig::Kubectl(t)) if t.namespace.is_empty() => {
                invalid("Namespace is empty")
            }
            Some(TargetConfig::Ssh(t)) if t.hostname.is_empty() => invalid("SSH host is empty"),
            Some(_) => Ok(()),
        }
    }

    pub fn launcher(&self) -> Result<Launcher> {
        self.target
            .as_ref()
            .map(TargetConfig::launcher)
            .ok_or_else(|| SyncError::Config("No remote target configured".to_string()))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    pub fn bulk_timeout(&self) -> Duration {
        Duration::from_secs(self.bulk_timeout_secs)
    }

    pub fn remote_root(&self) -> RemotePath {
        RemotePath::new(&self.dest)
    }

    pub fn encoder(&self) -> ContentEncoder {
        ContentEncoder::new(self.encoding, self.inline_limit, self.max_file_size)
    }

    pub fn translator(&self, root: &Path) -> PathTranslator {
        PathTranslator::new(root, self.remote_root())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.debounce(), Duration::from_millis(500));
        assert_eq!(config.encoding, Encoding::Base64);
        assert_eq!(config.rename_policy, RenamePolicy::Mirror);
        assert!(config.initial_sync);
        assert!(!config.create_remote_root);
        assert!(config.bulk_timeout() > config.exec_timeout());
        // Missing dest and target
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_kubectl_target() {
        let config = Config::parse(
            r#"
            source = "/ws"
            dest = "/app"
            debounce_ms = 200
            encoding = "printf"
            rename_policy = "delete-only"

            [target]
            kind = "kubectl"
            pod = "web-0"
            container = "app"
            "#,
        )
        .unwrap();

        assert_eq!(config.source, PathBuf::from("/ws"));
        assert_eq!(config.debounce_ms, 200);
        assert_eq!(config.encoding, Encoding::Printf);
        assert_eq!(config.rename_policy, RenamePolicy::DeleteOnly);
        // Unset fields keep their defaults
        assert_eq!(config.max_parallel, DEFAULT_MAX_PARALLEL);

        match config.target.as_ref().unwrap() {
            TargetConfig::Kubectl(t) => {
                assert_eq!(t.pod, "web-0");
                assert_eq!(t.namespace, "default");
                assert_eq!(t.container.as_deref(), Some("app"));
            }
            other => panic!("unexpected target {:?}", other),
        }
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_ssh_and_local_targets() {
        let ssh = Config::parse(
            r#"
            dest = "/srv/app"
            [target]
            kind = "ssh"
            hostname = "build-box"
            user = "deploy"
            "#,
        )
        .unwrap();
        assert!(matches!(ssh.launcher().unwrap(), Launcher::Ssh(ref t) if t.port == 22));

        let local = Config::parse("dest = \"/tmp/mirror\"\n[target]\nkind = \"local\"\n").unwrap();
        assert!(matches!(local.launcher().unwrap(), Launcher::Local));
        local.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_relative_dest() {
        let config = Config {
            dest: "app".to_string(),
            target: Some(TargetConfig::Local),
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("absolute"));
    }

    #[test]
    fn test_unknown_field_values_rejected() {
        let err = Config::parse("encoding = \"hex\"").unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "dest = \"/app\"\nmax_parallel = 8\nbulk_timeout_secs = 3600").unwrap();

        let config = Config::discover(Some(file.path())).unwrap();
        assert_eq!(config.dest, "/app");
        assert_eq!(config.max_parallel, 8);
        assert_eq!(config.bulk_timeout(), Duration::from_secs(3600));

        assert!(Config::load(Path::new("/nonexistent/podsync.toml")).is_err());
    }
}
