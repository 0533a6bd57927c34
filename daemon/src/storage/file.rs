use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub trait FileIoWithBackup {
    /// Keeps the previous content as `<name>.bak`, then replaces the file atomically
    /// (write a `.tmp` sibling, rename it over the target).
    fn write_with_backup<P: AsRef<Path>>(path: P, content: &str) -> Result<(), std::io::Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        if path.is_file() {
            std::fs::copy(path, sibling(path, "bak"))?;
        }

        let tmp = sibling(path, "tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// `registry.json` -> `registry.json.<suffix>`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_name().unwrap_or_default().to_owned();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Trait for json files owned by the daemon.
pub trait Config: FileIoWithBackup {
    type ConfigType: Serialize + for<'de> Deserialize<'de>;

    fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Self::ConfigType> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self::ConfigType = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    fn save_config<P: AsRef<Path>>(path: P, config: &Self::ConfigType) -> anyhow::Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(config)?;
        Self::write_with_backup(path, &content)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    fn load_config_or_default<P: AsRef<Path>, F: FnOnce() -> Self::ConfigType>(
        path: P,
        default: F,
    ) -> anyhow::Result<Self::ConfigType> {
        match std::fs::metadata(path.as_ref()) {
            Ok(metadata) if metadata.is_file() => Self::load_config(path),
            _ => {
                let config = default();
                Self::save_config(path, &config)?;
                Ok(config)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Default)]
    struct Sample {
        names: Vec<String>,
    }

    struct SampleFile;
    impl FileIoWithBackup for SampleFile {}
    impl Config for SampleFile {
        type ConfigType = Sample;
    }

    #[test]
    fn default_is_written_then_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sample.json");

        let created = SampleFile::load_config_or_default(&path, || Sample {
            names: vec!["lobby".into()],
        })
        .unwrap();
        assert!(path.is_file());
        assert_eq!(SampleFile::load_config(&path).unwrap(), created);
    }

    #[test]
    fn save_keeps_previous_as_bak_and_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");

        SampleFile::save_config(&path, &Sample { names: vec!["a".into()] }).unwrap();
        SampleFile::save_config(&path, &Sample { names: vec!["b".into()] }).unwrap();

        let bak: Sample =
            serde_json::from_str(&std::fs::read_to_string(sibling(&path, "bak")).unwrap())
                .unwrap();
        assert_eq!(bak.names, ["a"]);
        assert_eq!(SampleFile::load_config(&path).unwrap().names, ["b"]);
        assert!(!sibling(&path, "tmp").exists());
    }
}
