use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Closed set of languages the pipeline dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceLang {
    Kotlin,
    Java,
    Resource,
    Unknown,
}

impl SourceLang {
    fn from_extension(ext: Option<&str>) -> Self {
        match ext {
            Some("kt") => Self::Kotlin,
            Some("java") => Self::Java,
            Some("xml") => Self::Resource,
            _ => Self::Unknown,
        }
    }
}

/// A discovered file, immutable for the duration of one build.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub path: PathBuf,
    pub lang: SourceLang,
}

impl SourceUnit {
    pub fn tag(path: PathBuf) -> Self {
        let lang = SourceLang::from_extension(path.extension().and_then(|e| e.to_str()));
        Self { path, lang }
    }
}

/// Walks the project source root and tags every regular file. Hidden files
/// and the manifest are skipped; the manifest is handled by the resource
/// stage, not compiled.
pub fn discover(src_root: &Path) -> Vec<SourceUnit> {
    let mut units = Vec::new();
    if !src_root.is_dir() {
        return units;
    }
    for entry in WalkDir::new(src_root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') || name == "AndroidManifest.xml" {
            continue;
        }
        units.push(SourceUnit::tag(entry.path().to_path_buf()));
    }
    units
}

/// The paths of every unit with the given language tag, in discovery order.
pub fn paths_for(units: &[SourceUnit], lang: SourceLang) -> Vec<PathBuf> {
    units
        .iter()
        .filter(|u| u.lang == lang)
        .map(|u| u.path.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn tags_by_extension() {
        assert_eq!(SourceUnit::tag("A.kt".into()).lang, SourceLang::Kotlin);
        assert_eq!(SourceUnit::tag("B.java".into()).lang, SourceLang::Java);
        assert_eq!(SourceUnit::tag("c.xml".into()).lang, SourceLang::Resource);
        assert_eq!(SourceUnit::tag("d.png".into()).lang, SourceLang::Unknown);
    }

    #[test]
    fn discovery_skips_hidden_and_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("kotlin/com/example")).unwrap();
        fs::write(root.join("kotlin/com/example/Main.kt"), "fun main() {}").unwrap();
        fs::write(root.join("AndroidManifest.xml"), "<manifest/>").unwrap();
        fs::write(root.join(".hidden"), "x").unwrap();
        fs::write(root.join("Util.java"), "class Util {}").unwrap();

        let units = discover(root);
        assert_eq!(units.len(), 2);
        assert_eq!(paths_for(&units, SourceLang::Kotlin).len(), 1);
        assert_eq!(paths_for(&units, SourceLang::Java).len(), 1);
    }

    #[test]
    fn missing_root_yields_no_units() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(discover(&tmp.path().join("nope")).is_empty());
    }
}
