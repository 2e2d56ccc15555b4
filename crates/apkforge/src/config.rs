use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

fn default_asset_dir() -> String {
    "assets".into()
}

fn default_sdk_dir() -> String {
    String::new()
}

fn default_kotlinc() -> String {
    "kotlinc".into()
}

fn default_javac() -> String {
    "javac".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ToolchainConfig {
    /// Bundled assets shipped alongside the binary (platform jar, tools).
    pub asset_dir: String,
    /// Local app-private toolchain directory; empty means `$HOME/.apkforge/sdk`.
    pub sdk_dir: String,
    pub kotlinc: String,
    pub javac: String,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            asset_dir: default_asset_dir(),
            sdk_dir: default_sdk_dir(),
            kotlinc: default_kotlinc(),
            javac: default_javac(),
        }
    }
}

impl ToolchainConfig {
    pub fn asset_dir(&self) -> PathBuf {
        PathBuf::from(&self.asset_dir)
    }

    pub fn sdk_dir(&self) -> PathBuf {
        let raw = self.sdk_dir.trim();
        if !raw.is_empty() {
            return PathBuf::from(raw);
        }
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".apkforge")
            .join("sdk")
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct SigningConfig {
    /// Keystore file holding the signing identity; empty disables signing
    /// (the build then falls back to an unsigned artifact).
    pub keystore: String,
}

impl SigningConfig {
    pub fn keystore_path(&self) -> Option<PathBuf> {
        let raw = self.keystore.trim();
        if raw.is_empty() {
            None
        } else {
            Some(PathBuf::from(raw))
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub toolchain: ToolchainConfig,
    pub signing: SigningConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .map_err(|e| Error::msg(format!("failed to read config {}: {e}", path.display())))?;
        toml::from_str(&data)
            .map_err(|e| Error::msg(format!("invalid config {}: {e}", path.display())))
    }

    /// Loads `path` when given; otherwise `apkforge.toml` if present in the
    /// working directory, else built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => {
                let fallback = Path::new("apkforge.toml");
                if fallback.is_file() {
                    Self::load(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}
