//! Resolution and integrity checks for bundled tool executables

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::Config;
use crate::domain::command::ToolKind;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct ToolEntry {
    path: Option<PathBuf>,
    sha256: Option<String>,
}

/// Outcome of verifying one tool
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCheck {
    pub tool: ToolKind,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Immutable map of tool -> executable path, built once at startup
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: HashMap<ToolKind, ToolEntry>,
}

impl ToolRegistry {
    pub fn from_config(config: &Config) -> Self {
        let mut tools = HashMap::new();
        let configured = [
            (ToolKind::Converter, &config.converter_path),
            (ToolKind::Serializer, &config.serializer_path),
            (ToolKind::Dumper, &config.dumper_path),
        ];
        for (tool, path) in configured {
            tools.insert(
                tool,
                ToolEntry {
                    path: path.as_ref().map(PathBuf::from),
                    sha256: config
                        .tool_checksums
                        .get(tool.as_str())
                        .map(|s| s.trim().to_ascii_lowercase()),
                },
            );
        }
        Self { tools }
    }

    /// Registry with explicit paths and no checksums
    pub fn with_paths(paths: impl IntoIterator<Item = (ToolKind, PathBuf)>) -> Self {
        let tools = paths
            .into_iter()
            .map(|(tool, path)| {
                (
                    tool,
                    ToolEntry {
                        path: Some(path),
                        sha256: None,
                    },
                )
            })
            .collect();
        Self { tools }
    }

    /// Absolute path of an existing executable for `tool`
    pub fn resolve(&self, tool: ToolKind) -> Result<PathBuf> {
        let path = self
            .tools
            .get(&tool)
            .and_then(|entry| entry.path.clone())
            .ok_or_else(|| Error::DependencyMissing {
                tool: tool.as_str().to_string(),
                reason: "no executable path configured".to_string(),
            })?;

        if !path.is_absolute() {
            return Err(Error::DependencyMissing {
                tool: tool.as_str().to_string(),
                reason: format!("configured path is not absolute: {}", path.display()),
            });
        }
        if !path.is_file() {
            return Err(Error::DependencyMissing {
                tool: tool.as_str().to_string(),
                reason: format!("executable not found at {}", path.display()),
            });
        }
        Ok(path)
    }

    /// Resolve `tool` and, when a checksum is configured, compare its SHA-256
    pub async fn verify(&self, tool: ToolKind) -> Result<PathBuf> {
        let path = self.resolve(tool)?;
        let Some(expected) = self.tools.get(&tool).and_then(|e| e.sha256.clone()) else {
            return Ok(path);
        };

        let hash_path = path.clone();
        let actual = tokio::task::spawn_blocking(move || sha256_file(&hash_path))
            .await
            .map_err(|e| Error::Internal(format!("hash task failed: {}", e)))??;

        if actual != expected {
            return Err(Error::ChecksumMismatch {
                tool: tool.as_str().to_string(),
                expected,
                actual,
            });
        }
        Ok(path)
    }

    /// Verify every configured tool. Tools with no configured path are skipped.
    pub async fn verify_all(&self) -> Vec<ToolCheck> {
        let mut checks = Vec::new();
        for tool in ToolKind::ALL {
            let configured = self
                .tools
                .get(&tool)
                .map(|e| e.path.is_some())
                .unwrap_or(false);
            if !configured {
                continue;
            }

            let check = match self.verify(tool).await {
                Ok(path) => {
                    info!("Tool {} verified at {}", tool.as_str(), path.display());
                    ToolCheck {
                        tool,
                        ok: true,
                        path: Some(path.display().to_string()),
                        error: None,
                    }
                }
                Err(e) => {
                    warn!("Tool {} failed verification: {}", tool.as_str(), e);
                    ToolCheck {
                        tool,
                        ok: false,
                        path: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            checks.push(check);
        }
        checks
    }
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
