use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use regex::Regex;
use walkdir::WalkDir;

use crate::diagnostics::{Diagnostic, DiagnosticKind, Severity, StageResult};
use crate::error::Result;
use crate::exec::BuildCtx;
use crate::source::{paths_for, SourceLang, SourceUnit};
use crate::toolchain::ToolchainPaths;
use crate::workspace::BuildWorkspace;

/// One language's compiler invocation. The stage runs these in a fixed
/// order; the shared classpath contains the classes directory, so each
/// compiler resolves symbols produced by the ones before it.
struct LanguageCompiler {
    lang: SourceLang,
    kind: DiagnosticKind,
    program: String,
    label: &'static str,
}

impl LanguageCompiler {
    fn command(&self, files: &[PathBuf], classpath: &[PathBuf], out_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-d").arg(out_dir);
        if !classpath.is_empty() {
            let flag = match self.lang {
                SourceLang::Kotlin => "-classpath",
                _ => "-cp",
            };
            cmd.arg(flag).arg(join_classpath(classpath));
        }
        for f in files {
            cmd.arg(f);
        }
        cmd
    }
}

fn join_classpath(classpath: &[PathBuf]) -> OsString {
    let mut out = OsString::new();
    for (i, p) in classpath.iter().enumerate() {
        if i > 0 {
            out.push(":");
        }
        out.push(p);
    }
    out
}

/// Compiles all discovered source units, Kotlin first, then Java (which
/// may reference the Kotlin output via the shared classes directory).
/// A failing group is terminal: later groups are never attempted.
pub fn compile(
    units: &[SourceUnit],
    toolchain: &ToolchainPaths,
    workspace: &BuildWorkspace,
    ctx: &BuildCtx,
) -> Result<StageResult> {
    let kotlin_files = paths_for(units, SourceLang::Kotlin);
    let java_files = paths_for(units, SourceLang::Java);
    if kotlin_files.is_empty() && java_files.is_empty() {
        return Ok(StageResult::fail(Diagnostic::error(
            DiagnosticKind::NoSourceFiles,
            "no Kotlin or Java source files found; a project needs application code",
        )));
    }

    // Generated bindings compile with the project's Java group.
    let mut java_files = java_files;
    java_files.extend(generated_java(&workspace.gen_dir));

    let classpath = vec![
        toolchain.android_jar.clone(),
        toolchain.kotlin_stdlib.clone(),
        workspace.classes_dir.clone(),
    ];

    let compilers = [
        LanguageCompiler {
            lang: SourceLang::Kotlin,
            kind: DiagnosticKind::KotlinCompile,
            program: toolchain.kotlinc.clone(),
            label: "Kotlin",
        },
        LanguageCompiler {
            lang: SourceLang::Java,
            kind: DiagnosticKind::JavaCompile,
            program: toolchain.javac.clone(),
            label: "Java",
        },
    ];

    let mut warnings = Vec::new();
    for compiler in &compilers {
        let files = match compiler.lang {
            SourceLang::Kotlin => &kotlin_files,
            _ => &java_files,
        };
        if files.is_empty() {
            continue;
        }
        ctx.log(&format!(
            "compiling {} {} file(s)",
            files.len(),
            compiler.label
        ));
        tracing::info!(language = compiler.label, files = files.len(), "compiling");

        let out = ctx.run_tool(compiler.command(files, &classpath, &workspace.classes_dir))?;
        let mut diags = parse_compiler_output(&out.output, compiler.kind);
        if !out.ok {
            if !diags.iter().any(|d| d.severity == Severity::Error) {
                diags.push(Diagnostic::error(
                    compiler.kind,
                    format!("{} compiler failed:\n{}", compiler.label, out.output),
                ));
            }
            warnings.extend(diags);
            return Ok(StageResult::fail_all(warnings));
        }
        warnings.extend(diags.into_iter().filter(|d| d.severity == Severity::Warning));
    }

    let mut result = StageResult::ok_with_artifact(workspace.classes_dir.clone());
    result.diagnostics = warnings;
    Ok(result)
}

fn generated_java(gen_dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(gen_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|x| x == "java"))
        .map(|e| e.path().to_path_buf())
        .collect()
}

/// Pulls structured locations out of `file:line[:col]: severity: message`
/// lines, the shape both kotlinc and javac print. Lines that do not match
/// are left to the fallback whole-output diagnostic.
fn parse_compiler_output(output: &str, kind: DiagnosticKind) -> Vec<Diagnostic> {
    let re = Regex::new(r"^(?P<file>[^\s:][^:]*):(?P<line>\d+):(?:(?P<col>\d+):)?\s*(?P<sev>error|warning):\s*(?P<msg>.+)$")
        .expect("diagnostic pattern");
    let mut out = Vec::new();
    for line in output.lines() {
        let Some(c) = re.captures(line.trim_end()) else {
            continue;
        };
        let sev = if &c["sev"] == "error" {
            Severity::Error
        } else {
            Severity::Warning
        };
        let mut d = Diagnostic::error(kind, c["msg"].to_string()).at(
            PathBuf::from(&c["file"]),
            c["line"].parse().ok(),
            c.name("col").and_then(|m| m.as_str().parse().ok()),
        );
        d.severity = sev;
        out.push(d);
    }
    out
}
