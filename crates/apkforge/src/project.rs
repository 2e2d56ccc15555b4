use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const METADATA_FILE: &str = "project.json";

fn default_min_sdk() -> u32 {
    24
}

fn default_target_sdk() -> u32 {
    34
}

fn default_version_code() -> u32 {
    1
}

fn default_version_name() -> String {
    "1.0.0".into()
}

/// Project identity and versioning, persisted as `project.json` at the
/// project root. Written by project-management tooling; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDescriptor {
    pub name: String,
    pub package_name: String,
    #[serde(default = "default_min_sdk")]
    pub min_sdk: u32,
    #[serde(default = "default_target_sdk")]
    pub target_sdk: u32,
    #[serde(default = "default_version_code")]
    pub version_code: u32,
    #[serde(default = "default_version_name")]
    pub version_name: String,
    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub last_modified: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip)]
    root: PathBuf,
}

impl ProjectDescriptor {
    pub fn load(project_dir: &Path) -> Result<Self> {
        let meta = project_dir.join(METADATA_FILE);
        let data = fs::read_to_string(&meta)
            .map_err(|e| Error::msg(format!("failed to read {}: {e}", meta.display())))?;
        let mut desc: ProjectDescriptor = serde_json::from_str(&data)
            .map_err(|e| Error::msg(format!("invalid project metadata {}: {e}", meta.display())))?;
        desc.root = project_dir.to_path_buf();
        Ok(desc)
    }

    /// Must hold before any stage runs: the root exists and carries a manifest.
    pub fn validate(&self) -> Result<()> {
        if !self.root.is_dir() {
            return Err(Error::msg(format!(
                "project root {} does not exist",
                self.root.display()
            )));
        }
        if self.name.trim().is_empty() {
            return Err(Error::msg("project name is empty"));
        }
        if self.package_name.trim().is_empty() {
            return Err(Error::msg("project package name is empty"));
        }
        let manifest = self.manifest_file();
        if !manifest.is_file() {
            return Err(Error::msg(format!(
                "manifest not found at {}",
                manifest.display()
            )));
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn src_dir(&self) -> PathBuf {
        self.root.join("app/src/main")
    }

    pub fn res_dir(&self) -> PathBuf {
        self.src_dir().join("res")
    }

    pub fn manifest_file(&self) -> PathBuf {
        self.src_dir().join("AndroidManifest.xml")
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.src_dir().join("assets")
    }

    pub fn native_lib_dir(&self) -> PathBuf {
        self.src_dir().join("jniLibs")
    }

    pub fn build_dir(&self) -> PathBuf {
        self.root.join("build")
    }

    pub fn final_artifact_path(&self) -> PathBuf {
        self.build_dir()
            .join("outputs")
            .join(format!("{}-debug.apk", self.name))
    }
}
