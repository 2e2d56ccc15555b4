#![allow(dead_code)]

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use apkforge::toolchain::ToolchainPaths;

/// Writes an executable shell script standing in for an external tool.
pub fn stub_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
}

/// Minimal project tree: metadata, manifest, and a Kotlin entry point.
pub fn fixture_project(root: &Path, name: &str) -> PathBuf {
    let dir = root.join(name);
    let src = dir.join("app/src/main");
    fs::create_dir_all(src.join("kotlin/com/example")).unwrap();
    fs::write(
        dir.join("project.json"),
        format!(r#"{{"name": "{name}", "packageName": "com.example.{name}", "minSdk": 24, "targetSdk": 34}}"#),
    )
    .unwrap();
    fs::write(src.join("AndroidManifest.xml"), "<manifest/>").unwrap();
    fs::write(
        src.join("kotlin/com/example/Main.kt"),
        "fun main() { println(\"hi\") }\n",
    )
    .unwrap();
    dir
}

/// Toolchain whose binaries are caller-provided stubs. The jars only need
/// to exist; nothing in the pipeline opens them.
pub fn stub_toolchain(tools_dir: &Path, aapt2: PathBuf, d8: PathBuf, kotlinc: &Path, javac: &Path) -> ToolchainPaths {
    let android_jar = tools_dir.join("android.jar");
    let kotlin_stdlib = tools_dir.join("kotlin-stdlib.jar");
    fs::write(&android_jar, b"jar").unwrap();
    fs::write(&kotlin_stdlib, b"jar").unwrap();
    ToolchainPaths {
        sdk_dir: tools_dir.to_path_buf(),
        aapt2,
        d8,
        android_jar,
        kotlin_stdlib,
        kotlinc: kotlinc.display().to_string(),
        javac: javac.display().to_string(),
    }
}

/// aapt2 stub: `compile` emits one `.flat` per input; `link` copies a
/// pre-made archive into place and writes a generated binding source.
pub fn stub_aapt2(tools_dir: &Path, premade_archive: &Path) -> PathBuf {
    let body = format!(
        r#"cmd="$1"; shift
if [ "$cmd" = "compile" ]; then
  out=""
  while [ $# -gt 0 ]; do
    case "$1" in
      -o) out="$2"; shift 2;;
      *) base=$(basename "$1"); : > "$out/$base.flat"; shift;;
    esac
  done
elif [ "$cmd" = "link" ]; then
  out=""; java=""
  while [ $# -gt 0 ]; do
    case "$1" in
      -o) out="$2"; shift 2;;
      --java) java="$2"; shift 2;;
      -I|--manifest|--min-sdk-version|--target-sdk-version) shift 2;;
      *) shift;;
    esac
  done
  cp "{premade}" "$out"
  mkdir -p "$java"
  printf 'public final class R {{}}\n' > "$java/R.java"
fi"#,
        premade = premade_archive.display()
    );
    stub_tool(tools_dir, "aapt2", &body)
}

/// kotlinc stub: records its argv and drops a class file into `-d`.
pub fn stub_kotlinc_ok(tools_dir: &Path) -> PathBuf {
    let body = r#"out=""
argv_log="$(dirname "$0")/kotlinc.args"
printf '%s\n' "$@" > "$argv_log"
while [ $# -gt 0 ]; do
  case "$1" in
    -d) out="$2"; shift 2;;
    -classpath) shift 2;;
    *) shift;;
  esac
done
mkdir -p "$out/com/example"
printf 'class' > "$out/com/example/MainKt.class""#;
    stub_tool(tools_dir, "kotlinc", body)
}

pub fn stub_kotlinc_failing(tools_dir: &Path) -> PathBuf {
    let body = r#"echo "src/Main.kt:3:14: error: unresolved reference: foo" >&2
exit 1"#;
    stub_tool(tools_dir, "kotlinc", body)
}

/// javac stub: records that it ran, then drops a class file into `-d`.
pub fn stub_javac_ok(tools_dir: &Path) -> PathBuf {
    let body = r#"out=""
argv_log="$(dirname "$0")/javac.args"
printf '%s\n' "$@" > "$argv_log"
while [ $# -gt 0 ]; do
  case "$1" in
    -d) out="$2"; shift 2;;
    -cp) shift 2;;
    *) shift;;
  esac
done
mkdir -p "$out"
printf 'class' > "$out/R.class""#;
    stub_tool(tools_dir, "javac", body)
}

/// d8 stub: writes `classes.dex` into `--output`.
pub fn stub_d8_ok(tools_dir: &Path) -> PathBuf {
    let body = r#"out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output) out="$2"; shift 2;;
    --lib|--min-api) shift 2;;
    *) shift;;
  esac
done
printf 'dex' > "$out/classes.dex""#;
    stub_tool(tools_dir, "d8", body)
}

pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

pub fn zip_entry_names(path: &Path) -> BTreeSet<String> {
    let file = fs::File::open(path).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

pub fn zip_entry_bytes(path: &Path, name: &str) -> Vec<u8> {
    let file = fs::File::open(path).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut buf = Vec::new();
    std::io::Read::read_to_end(&mut entry, &mut buf).unwrap();
    buf
}
