use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::ToolchainConfig;

/// Resolved locations of every external tool and library a build needs.
/// Produced once by `ensure_ready` and threaded through the stages; no
/// process-global toolchain state.
#[derive(Debug, Clone)]
pub struct ToolchainPaths {
    pub sdk_dir: PathBuf,
    pub aapt2: PathBuf,
    pub d8: PathBuf,
    pub android_jar: PathBuf,
    pub kotlin_stdlib: PathBuf,
    pub kotlinc: String,
    pub javac: String,
}

#[derive(Debug)]
pub enum ProvisionError {
    MissingAsset(PathBuf),
    PermissionDenied(PathBuf, io::Error),
}

impl fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAsset(p) => write!(f, "required toolchain asset missing: {}", p.display()),
            Self::PermissionDenied(p, e) => {
                write!(f, "cannot prepare {}: {e}", p.display())
            }
        }
    }
}

impl std::error::Error for ProvisionError {}

const PLATFORM_JAR: &str = "android.jar";
const KOTLIN_STDLIB: &str = "kotlin-stdlib.jar";
const AAPT2_BIN: &str = "aapt2";
const D8_BIN: &str = "d8";

/// Copies the bundled platform archive and tool binaries from the asset
/// directory into the local sdk directory, marking native tools
/// executable. Idempotent: files already present are left untouched.
pub fn ensure_ready(cfg: &ToolchainConfig) -> Result<ToolchainPaths, ProvisionError> {
    let sdk_dir = cfg.sdk_dir();
    fs::create_dir_all(&sdk_dir)
        .map_err(|e| ProvisionError::PermissionDenied(sdk_dir.clone(), e))?;

    let asset_dir = cfg.asset_dir();
    let android_jar = provision_file(&asset_dir, &sdk_dir, PLATFORM_JAR)?;
    let kotlin_stdlib = provision_file(&asset_dir, &sdk_dir, KOTLIN_STDLIB)?;
    let aapt2 = provision_file(&asset_dir, &sdk_dir, AAPT2_BIN)?;
    let d8 = provision_file(&asset_dir, &sdk_dir, D8_BIN)?;
    mark_executable(&aapt2)?;
    mark_executable(&d8)?;

    Ok(ToolchainPaths {
        sdk_dir,
        aapt2,
        d8,
        android_jar,
        kotlin_stdlib,
        kotlinc: cfg.kotlinc.clone(),
        javac: cfg.javac.clone(),
    })
}

fn provision_file(asset_dir: &Path, sdk_dir: &Path, name: &str) -> Result<PathBuf, ProvisionError> {
    let dest = sdk_dir.join(name);
    if dest.is_file() {
        return Ok(dest);
    }
    let src = asset_dir.join(name);
    if !src.is_file() {
        return Err(ProvisionError::MissingAsset(src));
    }
    fs::copy(&src, &dest).map_err(|e| ProvisionError::PermissionDenied(dest.clone(), e))?;
    tracing::debug!(asset = name, dest = %dest.display(), "provisioned toolchain asset");
    Ok(dest)
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> Result<(), ProvisionError> {
    use std::os::unix::fs::PermissionsExt;
    let meta =
        fs::metadata(path).map_err(|e| ProvisionError::PermissionDenied(path.to_path_buf(), e))?;
    let mut perms = meta.permissions();
    if perms.mode() & 0o111 != 0 {
        return Ok(());
    }
    perms.set_mode(perms.mode() | 0o755);
    fs::set_permissions(path, perms)
        .map_err(|e| ProvisionError::PermissionDenied(path.to_path_buf(), e))
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> Result<(), ProvisionError> {
    Ok(())
}
