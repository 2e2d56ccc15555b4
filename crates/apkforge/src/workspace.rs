use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use crate::error::{Error, Result};

/// Per-build scratch tree under `<project>/build`. Recreated fresh at the
/// start of every build; never shared between concurrent builds.
#[derive(Debug, Clone)]
pub struct BuildWorkspace {
    pub build_dir: PathBuf,
    /// Generated sources (resource bindings) land here.
    pub gen_dir: PathBuf,
    /// Compiled resource intermediates (`.flat` files).
    pub res_dir: PathBuf,
    /// Compiled class files from both language compilers.
    pub classes_dir: PathBuf,
    /// Converted bytecode output.
    pub dex_dir: PathBuf,
    /// Unsigned package and other packaging intermediates.
    pub apk_dir: PathBuf,
    /// Final artifacts only; left empty on failure or cancellation.
    pub outputs_dir: PathBuf,
}

impl BuildWorkspace {
    /// Deletes any previous tree and recreates every directory. The caller
    /// must hold the project's `BuildLock` before calling this.
    pub fn create(project_root: &Path) -> Result<Self> {
        let build_dir = project_root.join("build");
        safe_remove_dir_all(project_root, &build_dir)?;

        let ws = Self {
            gen_dir: build_dir.join("gen"),
            res_dir: build_dir.join("res"),
            classes_dir: build_dir.join("obj"),
            dex_dir: build_dir.join("dex"),
            apk_dir: build_dir.join("apk"),
            outputs_dir: build_dir.join("outputs"),
            build_dir,
        };
        for dir in [
            &ws.gen_dir,
            &ws.res_dir,
            &ws.classes_dir,
            &ws.dex_dir,
            &ws.apk_dir,
            &ws.outputs_dir,
        ] {
            fs::create_dir_all(dir)
                .map_err(|e| Error::msg(format!("failed to create {}: {e}", dir.display())))?;
        }
        Ok(ws)
    }
}

fn safe_remove_dir_all(root: &Path, dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    let root_can = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let dir_can = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    if !dir_can.starts_with(&root_can) {
        return Err(Error::msg(format!(
            "refusing to remove '{}' (outside project root '{}')",
            dir_can.display(),
            root_can.display()
        )));
    }
    fs::remove_dir_all(&dir_can)
        .map_err(|e| Error::msg(format!("failed to remove dir {}: {e}", dir_can.display())))?;
    Ok(())
}

fn active_builds() -> &'static Mutex<BTreeSet<PathBuf>> {
    static ACTIVE: OnceLock<Mutex<BTreeSet<PathBuf>>> = OnceLock::new();
    ACTIVE.get_or_init(|| Mutex::new(BTreeSet::new()))
}

/// Process-wide exclusivity guard: at most one in-flight build per project
/// root. The workspace is deleted and recreated at build start, so two
/// concurrent builds of the same project would corrupt each other.
#[derive(Debug)]
pub struct BuildLock {
    key: PathBuf,
}

impl BuildLock {
    /// Returns `None` when a build for this root is already in flight.
    pub fn acquire(project_root: &Path) -> Option<Self> {
        let key = project_root
            .canonicalize()
            .unwrap_or_else(|_| project_root.to_path_buf());
        // The set stays consistent across a poisoning panic; inserts and
        // removes are atomic with respect to the guard.
        let mut active = active_builds().lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(key.clone()) {
            return None;
        }
        Some(Self { key })
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        let mut active = active_builds().lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.key);
    }
}
