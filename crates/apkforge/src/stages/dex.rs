use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use walkdir::WalkDir;

use crate::diagnostics::{Diagnostic, DiagnosticKind, StageResult};
use crate::error::{Error, Result};
use crate::exec::BuildCtx;
use crate::toolchain::ToolchainPaths;
use crate::workspace::BuildWorkspace;

/// Converts every compiled class file into the platform bytecode format
/// with one converter invocation. All-or-nothing: output is produced in a
/// scratch directory and only moved into place on success.
pub fn convert(
    toolchain: &ToolchainPaths,
    workspace: &BuildWorkspace,
    min_api: u32,
    ctx: &BuildCtx,
) -> Result<StageResult> {
    let class_files = collect_class_files(&workspace.classes_dir);
    if class_files.is_empty() {
        // Distinguishes "compiler produced nothing" from "compiler never ran".
        return Ok(StageResult::fail(Diagnostic::error(
            DiagnosticKind::NoClassFiles,
            "no class files to convert; compilation produced no output",
        )));
    }

    ctx.log(&format!("converting {} class file(s)", class_files.len()));
    let scratch = workspace.build_dir.join("dex.tmp");
    fs::create_dir_all(&scratch)
        .map_err(|e| Error::msg(format!("failed to create {}: {e}", scratch.display())))?;

    let mut cmd = Command::new(&toolchain.d8);
    cmd.arg("--lib")
        .arg(&toolchain.android_jar)
        .arg("--min-api")
        .arg(min_api.to_string())
        .arg("--output")
        .arg(&scratch);
    for f in &class_files {
        cmd.arg(f);
    }
    let out = ctx.run_tool(cmd)?;
    if !out.ok {
        let _ = fs::remove_dir_all(&scratch);
        return Ok(StageResult::fail(Diagnostic::error(
            DiagnosticKind::Conversion,
            format!("bytecode conversion failed:\n{}", out.output),
        )));
    }

    let produced = move_dex_files(&scratch, &workspace.dex_dir)?;
    let _ = fs::remove_dir_all(&scratch);
    if produced == 0 {
        return Ok(StageResult::fail(Diagnostic::error(
            DiagnosticKind::Conversion,
            "converter exited cleanly but produced no dex output",
        )));
    }
    tracing::debug!(dex_files = produced, "bytecode conversion complete");
    Ok(StageResult::ok_with_artifact(workspace.dex_dir.clone()))
}

fn collect_class_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|x| x == "class"))
        .map(|e| e.path().to_path_buf())
        .collect()
}

fn move_dex_files(scratch: &Path, dex_dir: &Path) -> Result<usize> {
    let mut moved = 0usize;
    for entry in fs::read_dir(scratch)
        .map_err(|e| Error::msg(format!("failed to read {}: {e}", scratch.display())))?
    {
        let entry = entry.map_err(|e| Error::msg(format!("scratch read error: {e}")))?;
        let path = entry.path();
        if path.extension().is_some_and(|x| x == "dex") {
            let dest = dex_dir.join(entry.file_name());
            fs::rename(&path, &dest)
                .map_err(|e| Error::msg(format!("failed to move {}: {e}", path.display())))?;
            moved += 1;
        }
    }
    Ok(moved)
}
