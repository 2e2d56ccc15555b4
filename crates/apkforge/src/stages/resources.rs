use std::path::{Path, PathBuf};
use std::process::Command;

use walkdir::WalkDir;

use crate::diagnostics::{Diagnostic, DiagnosticKind, StageResult};
use crate::error::Result;
use crate::exec::BuildCtx;
use crate::project::ProjectDescriptor;
use crate::toolchain::ToolchainPaths;
use crate::workspace::BuildWorkspace;

pub const RESOURCE_ARCHIVE: &str = "resources.ap_";

/// Compiles every resource file to an intermediate `.flat` and links the
/// result against the platform archive and the manifest, producing the
/// generated source bindings and `resources.ap_`.
///
/// A project without resources is valid: success, no artifact.
pub fn compile_and_link(
    project: &ProjectDescriptor,
    toolchain: &ToolchainPaths,
    workspace: &BuildWorkspace,
    ctx: &BuildCtx,
) -> Result<StageResult> {
    let res_files = collect_resource_files(&project.res_dir());
    if res_files.is_empty() {
        tracing::debug!(project = %project.name, "no resources to compile");
        return Ok(StageResult::ok());
    }

    ctx.log(&format!("compiling {} resource file(s)", res_files.len()));
    let mut compile = Command::new(&toolchain.aapt2);
    compile.arg("compile").arg("-o").arg(&workspace.res_dir);
    for f in &res_files {
        compile.arg(f);
    }
    let out = ctx.run_tool(compile)?;
    if !out.ok {
        return Ok(StageResult::fail(Diagnostic::error(
            DiagnosticKind::ResourceCompile,
            format!("resource compiler failed:\n{}", out.output),
        )));
    }

    let archive = workspace.apk_dir.join(RESOURCE_ARCHIVE);
    ctx.log("linking resources");
    let mut link = Command::new(&toolchain.aapt2);
    link.arg("link")
        .arg("-o")
        .arg(&archive)
        .arg("-I")
        .arg(&toolchain.android_jar)
        .arg("--manifest")
        .arg(project.manifest_file())
        .arg("--java")
        .arg(&workspace.gen_dir)
        .arg("--auto-add-overlay")
        .arg("--min-sdk-version")
        .arg(project.min_sdk.to_string())
        .arg("--target-sdk-version")
        .arg(project.target_sdk.to_string());
    for flat in collect_flat_files(&workspace.res_dir) {
        link.arg(flat);
    }
    let out = ctx.run_tool(link)?;
    if !out.ok {
        return Ok(StageResult::fail(Diagnostic::error(
            DiagnosticKind::ResourceLink,
            format!("resource linker failed:\n{}", out.output),
        )));
    }

    Ok(StageResult::ok_with_artifact(archive))
}

fn collect_resource_files(res_dir: &Path) -> Vec<PathBuf> {
    if !res_dir.is_dir() {
        return Vec::new();
    }
    WalkDir::new(res_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .map(|e| e.path().to_path_buf())
        .collect()
}

fn collect_flat_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|x| x == "flat"))
        .map(|e| e.path().to_path_buf())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn collects_only_visible_files() {
        let tmp = tempfile::tempdir().unwrap();
        let res = tmp.path().join("res/values");
        fs::create_dir_all(&res).unwrap();
        fs::write(res.join("strings.xml"), "<resources/>").unwrap();
        fs::write(res.join(".DS_Store"), "junk").unwrap();

        let files = collect_resource_files(&tmp.path().join("res"));
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("strings.xml"));
    }

    #[test]
    fn flat_filter_matches_extension() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("values_strings.arsc.flat"), "x").unwrap();
        fs::write(tmp.path().join("notes.txt"), "x").unwrap();
        let flats = collect_flat_files(tmp.path());
        assert_eq!(flats.len(), 1);
    }
}
