//! Transport-safe content encoding.
//!
//! File bytes travel to the remote side as a single `sh -c` argument and are
//! decoded by the script that materializes them. Encodings are total on
//! their domain and injective, so `decode(encode(x)) == x`.
//!
//! Payloads over the inline limit are shipped as a one-entry gzip tar on
//! the command's standard input instead.

use crate::bulk;
use crate::error::{Result, SyncError};
use crate::path::RemotePath;
use crate::transport::RemoteCommand;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Default largest encoded argument sent inline.
/// Linux caps a single argv string at 128 KiB.
pub const DEFAULT_INLINE_LIMIT: usize = 96 * 1024;

const BASE64_WRITE_SCRIPT: &str = r#"set -e
tmp="$2.podsync.$$"
trap 'rm -f "$tmp"' EXIT
printf '%s' "$1" | base64 -d > "$tmp"
mv -f "$tmp" "$2""#;

const PRINTF_WRITE_SCRIPT: &str = r#"set -e
tmp="$2.podsync.$$"
trap 'rm -f "$tmp"' EXIT
printf "$1" > "$tmp"
mv -f "$tmp" "$2""#;

const ARCHIVE_WRITE_SCRIPT: &str = r#"set -e
tar -xzf - -C "$1""#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Encoding {
    /// Binary-safe, decoded remotely with `base64 -d`
    #[default]
    Base64,
    /// Text only, decoded by the remote `printf` format parser
    Printf,
}

impl FromStr for Encoding {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "base64" => Ok(Encoding::Base64),
            "printf" => Ok(Encoding::Printf),
            other => Err(SyncError::Config(format!(
                "Unknown encoding '{}', expected base64 or printf",
                other
            ))),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Base64 => f.write_str("base64"),
            Encoding::Printf => f.write_str("printf"),
        }
    }
}

/// Reasons content can't be represented in an encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NotUtf8,
    ContainsNul,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NotUtf8 => f.write_str("content is not valid UTF-8 text"),
            Rejection::ContainsNul => f.write_str("content contains NUL bytes"),
        }
    }
}

pub fn encode(encoding: Encoding, content: &[u8]) -> std::result::Result<String, Rejection> {
    match encoding {
        Encoding::Base64 => Ok(base64::engine::general_purpose::STANDARD.encode(content)),
        Encoding::Printf => escape_printf(content),
    }
}

/// Local mirror of the remote decode step.
pub fn decode(encoding: Encoding, encoded: &str) -> Option<Vec<u8>> {
    match encoding {
        Encoding::Base64 => base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .ok(),
        Encoding::Printf => unescape_printf(encoded),
    }
}

/// Escape text for use as a printf format. Every `\` and `%` is escaped,
/// as is every byte outside printable ASCII.
fn escape_printf(content: &[u8]) -> std::result::Result<String, Rejection> {
    if std::str::from_utf8(content).is_err() {
        return Err(Rejection::NotUtf8);
    }
    if content.contains(&0) {
        return Err(Rejection::ContainsNul);
    }

    let mut out = String::with_capacity(content.len() + content.len() / 8);
    for (i, &b) in content.iter().enumerate() {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'%' => out.push_str("%%"),
            // A leading dash would be read as an option by some printf builtins
            b'-' if i == 0 => out.push_str("\\055"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\{:03o}", b)),
        }
    }
    Ok(out)
}

fn unescape_printf(encoded: &str) -> Option<Vec<u8>> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                let next = *bytes.get(i + 1)?;
                if next == b'\\' {
                    out.push(b'\\');
                    i += 2;
                } else if (b'0'..=b'7').contains(&next) {
                    let mut value: u32 = 0;
                    let mut len = 0;
                    while len < 3 {
                        match bytes.get(i + 1 + len) {
                            Some(d @ b'0'..=b'7') => {
                                value = value * 8 + u32::from(d - b'0');
                                len += 1;
                            }
                            _ => break,
                        }
                    }
                    out.push(u8::try_from(value).ok()?);
                    i += 1 + len;
                } else {
                    return None;
                }
            }
            b'%' => {
                if bytes.get(i + 1) != Some(&b'%') {
                    return None;
                }
                out.push(b'%');
                i += 2;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Some(out)
}

/// Turns local file content into the single remote command that writes it.
#[derive(Debug, Clone)]
pub struct ContentEncoder {
    encoding: Encoding,
    inline_limit: usize,
    max_file_size: Option<u64>,
}

impl ContentEncoder {
    pub fn new(encoding: Encoding, inline_limit: usize, max_file_size: Option<u64>) -> Self {
        Self {
            encoding,
            inline_limit,
            max_file_size,
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn inline_limit(&self) -> usize {
        self.inline_limit
    }

    /// Build the command writing `content` (read from `local`) to `remote`.
    pub fn write_command(
        &self,
        local: &Path,
        remote: &RemotePath,
        content: &[u8],
    ) -> Result<RemoteCommand> {
        if let Some(max) = self.max_file_size {
            if content.len() as u64 > max {
                return Err(SyncError::UnsupportedContent {
                    path: local.to_path_buf(),
                    reason: format!("{} bytes exceeds max_file_size {}", content.len(), max),
                });
            }
        }

        // Encoded output is never shorter than its input
        if content.len() > self.inline_limit {
            return self.archive_command(local, remote, content);
        }

        let encoded =
            encode(self.encoding, content).map_err(|reason| SyncError::UnsupportedContent {
                path: local.to_path_buf(),
                reason: reason.to_string(),
            })?;

        if encoded.len() > self.inline_limit {
            return self.archive_command(local, remote, content);
        }

        let script = match self.encoding {
            Encoding::Base64 => BASE64_WRITE_SCRIPT,
            Encoding::Printf => PRINTF_WRITE_SCRIPT,
        };
        Ok(RemoteCommand::shell(
            script,
            [encoded, remote.as_str().to_string()],
        ))
    }

    fn archive_command(
        &self,
        local: &Path,
        remote: &RemotePath,
        content: &[u8],
    ) -> Result<RemoteCommand> {
        let parent = remote.parent().ok_or_else(|| SyncError::UnsupportedContent {
            path: local.to_path_buf(),
            reason: format!("remote path {} has no parent directory", remote),
        })?;
        let name = remote
            .as_str()
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();

        let archive = bulk::archive_single(&name, content, local)?;
        tracing::debug!(
            path = %local.display(),
            size = content.len(),
            archive_size = archive.len(),
            "Content over inline limit, sending as archive"
        );
        Ok(RemoteCommand::shell(ARCHIVE_WRITE_SCRIPT, [parent.as_str()]).with_stdin(archive))
    }
}

/// Pull the inline payload and encoding back out of a write command.
/// Returns `None` for archive writes and unrelated commands.
pub fn inline_payload(command: &RemoteCommand) -> Option<(Encoding, &str, &str)> {
    match command.argv.as_slice() {
        [sh, c, script, _, payload, target] if sh == "sh" && c == "-c" => {
            let encoding = if script == BASE64_WRITE_SCRIPT {
                Encoding::Base64
            } else if script == PRINTF_WRITE_SCRIPT {
                Encoding::Printf
            } else {
                return None;
            };
            Some((encoding, payload.as_str(), target.as_str()))
        }
        _ => None,
    }
}
