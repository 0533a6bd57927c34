use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Context;
use sha1::{Digest, Sha1};

use crate::config::StorageConfig;

/// Directory layout of the daemon's data root.
#[derive(Debug, Clone)]
pub struct Files {
    pub instances_root: PathBuf,
    pub backups_root: PathBuf,
    pub cores_root: PathBuf,
    pub registry_file: PathBuf,
}

impl Files {
    pub fn new(config: &StorageConfig) -> std::io::Result<Self> {
        let files = Self {
            instances_root: config.root.join(&config.instances_dir),
            backups_root: config.root.join(&config.backups_dir),
            cores_root: config.root.join(&config.cores_dir),
            registry_file: config.root.join(&config.registry_file),
        };
        files.init_dirs()?;
        Ok(files)
    }

    fn init_dirs(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.instances_root)?;
        fs::create_dir_all(&self.backups_root)?;
        fs::create_dir_all(&self.cores_root)?;
        Ok(())
    }

    /// `<root>/<name>`, or `<root>/<name>-1`, `-2`, ... if taken.
    pub fn unique_dir(root: &Path, name: &str) -> PathBuf {
        let candidate = root.join(name);
        if !candidate.exists() {
            return candidate;
        }
        (1..)
            .map(|n| root.join(format!("{}-{}", name, n)))
            .find(|p| !p.exists())
            .unwrap_or(candidate)
    }

    /// Lowercase hex SHA-1 of a file.
    pub async fn get_sha1(path: impl AsRef<Path>) -> anyhow::Result<String> {
        let path = path.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
            let mut hasher = Sha1::new();
            let mut file = fs::File::open(&path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            let mut buffer = [0; 32768];
            loop {
                let read = file.read(&mut buffer)?;
                if read == 0 {
                    break;
                }
                hasher.update(&buffer[..read]);
            }
            Ok(format!("{:x}", hasher.finalize()))
        })
        .await
        .context("hash task panicked")?
    }

    /// Rejects anything that could escape the directory it is joined onto.
    pub fn is_plain_file_name(name: &str) -> bool {
        !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\'])
            && !name.contains('\0')
    }
}
