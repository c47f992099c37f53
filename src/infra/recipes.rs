//! Package definition tree
//!
//! Loads every `package.toml` below the aports directory into a
//! [`PackageGraph`] and rewrites pkgrel values in place.

use std::fs;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::config::defaults::PACKAGE_FILE;
use crate::core::graph::PackageGraph;
use crate::core::package::Package;
use crate::error::PackageError;

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

/// Paths of every package definition below `aports_dir`, sorted
pub fn find_definitions(aports_dir: &Path) -> Result<Vec<PathBuf>, PackageError> {
    if !aports_dir.is_dir() {
        return Err(PackageError::IoError {
            path: aports_dir.to_path_buf(),
            error: "package definition directory does not exist".to_string(),
        });
    }

    let mut paths = Vec::new();
    for entry in WalkDir::new(aports_dir)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
    {
        let entry = entry.map_err(|e| PackageError::IoError {
            path: e.path().map_or_else(|| aports_dir.to_path_buf(), Path::to_path_buf),
            error: e.to_string(),
        })?;
        if entry.file_type().is_file() && entry.file_name() == PACKAGE_FILE {
            paths.push(entry.into_path());
        }
    }
    paths.sort();
    Ok(paths)
}

/// Load a single definition file
pub fn load_package(path: &Path) -> Result<Package, PackageError> {
    let content = fs::read_to_string(path).map_err(|e| PackageError::IoError {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;
    Package::from_toml(&content, path)
}

/// Load the full package graph
pub fn load_graph(aports_dir: &Path) -> Result<PackageGraph, PackageError> {
    let mut graph = PackageGraph::new();
    for path in find_definitions(aports_dir)? {
        graph.add_package(load_package(&path)?)?;
    }
    tracing::info!("Loaded {} package definition(s) from {}", graph.len(), aports_dir.display());
    Ok(graph)
}

/// Rewrite `pkgrel` in a definition file, keeping everything else
pub fn set_pkgrel(path: &Path, pkgrel: u32) -> Result<(), PackageError> {
    update_package_table(path, &[("pkgrel", toml::Value::Integer(i64::from(pkgrel)))])?;
    tracing::debug!("Set pkgrel {pkgrel} in {}", path.display());
    Ok(())
}

/// Rewrite `version` in a definition file and restart `pkgrel` at 0
pub fn set_version(path: &Path, version: &str) -> Result<(), PackageError> {
    update_package_table(
        path,
        &[
            ("version", toml::Value::String(version.to_string())),
            ("pkgrel", toml::Value::Integer(0)),
        ],
    )?;
    tracing::debug!("Set version {version} in {}", path.display());
    Ok(())
}

fn update_package_table(path: &Path, values: &[(&str, toml::Value)]) -> Result<(), PackageError> {
    let io_error = |e: std::io::Error| PackageError::IoError {
        path: path.to_path_buf(),
        error: e.to_string(),
    };
    let parse_error = |error: String| PackageError::ParseError {
        path: path.to_path_buf(),
        error,
    };

    let content = fs::read_to_string(path).map_err(io_error)?;
    let mut doc: toml::Table = content.parse().map_err(|e: toml::de::Error| parse_error(e.to_string()))?;
    let package = doc
        .get_mut("package")
        .and_then(toml::Value::as_table_mut)
        .ok_or_else(|| parse_error("missing [package] table".to_string()))?;
    for (key, value) in values {
        package.insert((*key).to_string(), value.clone());
    }

    let updated = toml::to_string_pretty(&doc).map_err(|e| parse_error(e.to_string()))?;
    fs::write(path, updated).map_err(io_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) -> PathBuf {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    const ZLIB: &str = r#"
[package]
name = "zlib"
version = "1.3.1"
pkgrel = 2
arch = ["all"]

[source.checksums]
"zlib-1.3.1.tar.gz" = "abc"
"#;

    #[test]
    fn test_load_graph_skips_hidden_dirs() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "main/zlib/package.toml", ZLIB);
        write(
            temp.path(),
            "main/busybox/package.toml",
            "[package]\nname = \"busybox\"\nversion = \"1.36\"\narch = [\"all\"]\ndepends = [\"zlib\"]\n",
        );
        write(temp.path(), ".git/zlib/package.toml", ZLIB);

        let graph = load_graph(temp.path()).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.get("zlib").unwrap().pkgrel, 2);
    }

    #[test]
    fn test_load_graph_reports_duplicates() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "main/zlib/package.toml", ZLIB);
        write(temp.path(), "community/zlib/package.toml", ZLIB);

        let err = load_graph(temp.path()).unwrap_err();
        assert!(matches!(err, PackageError::Duplicate { .. }));
    }

    #[test]
    fn test_missing_aports_dir() {
        let temp = TempDir::new().unwrap();
        assert!(load_graph(&temp.path().join("nope")).is_err());
    }

    #[test]
    fn test_set_pkgrel_keeps_other_fields() {
        let temp = TempDir::new().unwrap();
        let path = write(temp.path(), "main/zlib/package.toml", ZLIB);

        set_pkgrel(&path, 3).unwrap();
        let package = load_package(&path).unwrap();
        assert_eq!(package.pkgrel, 3);
        assert_eq!(package.version, "1.3.1");
        assert_eq!(package.checksums["zlib-1.3.1.tar.gz"], "abc");
    }

    #[test]
    fn test_set_version_resets_pkgrel() {
        let temp = TempDir::new().unwrap();
        let path = write(temp.path(), "main/zlib/package.toml", ZLIB);
        set_pkgrel(&path, 3).unwrap();

        set_version(&path, "1.3.2").unwrap();
        let package = load_package(&path).unwrap();
        assert_eq!(package.version, "1.3.2");
        assert_eq!(package.pkgrel, 0);
        assert_eq!(package.checksums["zlib-1.3.1.tar.gz"], "abc");
    }
}
