use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::diagnostics::{Diagnostic, DiagnosticKind, StageResult};
use crate::error::{Error, Result};
use crate::exec::BuildCtx;
use crate::project::ProjectDescriptor;
use crate::workspace::BuildWorkspace;

/// Merges the linked resource archive, converted bytecode, assets and
/// native libraries into one unsigned package. Entries are streamed, never
/// fully buffered. On failure the partial archive is deleted so a retry
/// starts clean.
pub fn pack(
    project: &ProjectDescriptor,
    workspace: &BuildWorkspace,
    resource_archive: Option<&Path>,
    ctx: &BuildCtx,
) -> Result<StageResult> {
    let output = workspace
        .apk_dir
        .join(format!("{}-unsigned.apk", project.name));

    match write_archive(project, workspace, resource_archive, &output, ctx) {
        Ok(()) => Ok(StageResult::ok_with_artifact(output)),
        Err(e) => {
            let _ = fs::remove_file(&output);
            Ok(StageResult::fail(Diagnostic::error(
                DiagnosticKind::Packaging,
                format!("packaging failed: {e}"),
            )))
        }
    }
}

fn write_archive(
    project: &ProjectDescriptor,
    workspace: &BuildWorkspace,
    resource_archive: Option<&Path>,
    output: &Path,
    ctx: &BuildCtx,
) -> Result<()> {
    let file = fs::File::create(output)
        .map_err(|e| Error::msg(format!("failed to create {}: {e}", output.display())))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default();

    // Resource entries keep the compression the linker chose for them.
    if let Some(archive_path) = resource_archive {
        let reader = fs::File::open(archive_path).map_err(|e| {
            Error::msg(format!(
                "resource archive missing at {}: {e}",
                archive_path.display()
            ))
        })?;
        let mut archive = ZipArchive::new(reader)?;
        for i in 0..archive.len() {
            let entry = archive.by_index_raw(i)?;
            writer.raw_copy_file(entry)?;
        }
    }

    let mut dex_count = 0usize;
    for dex in sorted_files(&workspace.dex_dir, Some("dex")) {
        let name = dex
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::msg(format!("unusable dex file name: {}", dex.display())))?;
        append_file(&mut writer, &dex, name, options)?;
        dex_count += 1;
    }
    ctx.log(&format!("packaged {dex_count} dex file(s)"));

    append_tree(&mut writer, &project.assets_dir(), "assets", options)?;
    append_tree(&mut writer, &project.native_lib_dir(), "lib", options)?;

    writer.finish()?;
    Ok(())
}

fn append_tree(
    writer: &mut ZipWriter<fs::File>,
    root: &Path,
    prefix: &str,
    options: SimpleFileOptions,
) -> Result<()> {
    if !root.is_dir() {
        return Ok(());
    }
    for path in sorted_files(root, None) {
        let rel = path
            .strip_prefix(root)
            .map_err(|_| Error::msg(format!("path escapes {}: {}", root.display(), path.display())))?;
        let name = format!("{prefix}/{}", entry_name(rel));
        append_file(writer, &path, &name, options)?;
    }
    Ok(())
}

fn append_file(
    writer: &mut ZipWriter<fs::File>,
    path: &Path,
    name: &str,
    options: SimpleFileOptions,
) -> Result<()> {
    writer.start_file(name, options)?;
    let mut f = fs::File::open(path)
        .map_err(|e| Error::msg(format!("failed to open {}: {e}", path.display())))?;
    io::copy(&mut f, writer)
        .map_err(|e| Error::msg(format!("failed to stream {}: {e}", path.display())))?;
    Ok(())
}

fn sorted_files(dir: &Path, ext: Option<&str>) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| match ext {
            Some(x) => e.path().extension().is_some_and(|p| p == x),
            None => true,
        })
        .map(|e| e.path().to_path_buf())
        .collect()
}

// Zip entry names always use forward slashes.
fn entry_name(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
