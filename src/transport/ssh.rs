//! `ssh` launcher. ssh joins its arguments into one string for the remote
//! login shell, so every argv element is quoted here.

use super::RemoteCommand;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::process::Command;

/// ssh reserves this exit status for its own failures
const SSH_FAILURE_STATUS: i32 = 255;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshTarget {
    pub hostname: String,
    #[serde(default)]
    pub user: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub identity_file: Vec<PathBuf>,
}

fn default_port() -> u16 {
    22
}

impl SshTarget {
    /// Parse `[user@]host[:port]`.
    pub fn parse(spec: &str) -> Self {
        let (user, rest) = match spec.split_once('@') {
            Some((user, rest)) => (user.to_string(), rest),
            None => (String::new(), spec),
        };
        let (hostname, port) = match rest.rsplit_once(':') {
            Some((host, port)) => match port.parse() {
                Ok(port) => (host.to_string(), port),
                Err(_) => (rest.to_string(), default_port()),
            },
            None => (rest.to_string(), default_port()),
        };
        Self {
            hostname,
            user,
            port,
            identity_file: Vec::new(),
        }
    }

    pub fn args(&self, remote: &RemoteCommand) -> Vec<String> {
        let mut args = vec!["-o".to_string(), "BatchMode=yes".to_string()];

        if !self.user.is_empty() {
            args.push("-l".to_string());
            args.push(self.user.clone());
        }

        if self.port != 22 {
            args.push("-p".to_string());
            args.push(self.port.to_string());
        }

        for key in &self.identity_file {
            args.push("-i".to_string());
            args.push(key.to_string_lossy().into_owned());
        }

        args.push(self.hostname.clone());
        args.push(shell_words::join(&remote.argv));
        args
    }

    pub fn command(&self, remote: &RemoteCommand) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(self.args(remote));
        cmd
    }

    pub fn channel_fault(&self, status: Option<i32>, stderr: &str) -> Option<String> {
        match status {
            None => Some("ssh terminated by signal".to_string()),
            Some(SSH_FAILURE_STATUS) => Some(
                stderr
                    .lines()
                    .find(|l| !l.trim().is_empty())
                    .unwrap_or("ssh connection failed")
                    .trim()
                    .to_string(),
            ),
            Some(_) => None,
        }
    }

    pub fn describe(&self) -> String {
        if self.user.is_empty() {
            format!("ssh {}:{}", self.hostname, self.port)
        } else {
            format!("ssh {}@{}:{}", self.user, self.hostname, self.port)
        }
    }
}
