use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use mcsm_protocol::management::backup::BackupInfo;

use crate::storage::Files;

const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// Archive operations the core delegates to. Each call either completes or leaves
/// nothing behind: archives are written to a temporary file and renamed on success.
#[async_trait::async_trait]
pub trait ArchiveService: Send + Sync {
    /// Archives `source` into a new file in `dest_dir`. `exclude` subtrees (and `dest_dir`
    /// itself, when nested in `source`) are skipped.
    async fn create(
        &self,
        source: &Path,
        dest_dir: &Path,
        label: &str,
        exclude: &[PathBuf],
    ) -> anyhow::Result<BackupInfo>;

    /// Newest first.
    async fn list(&self, dir: &Path) -> anyhow::Result<Vec<BackupInfo>>;

    async fn delete(&self, dir: &Path, name: &str) -> anyhow::Result<()>;

    async fn extract(&self, archive: &Path, target: &Path) -> anyhow::Result<()>;
}

pub struct TarGzArchiver;

#[async_trait::async_trait]
impl ArchiveService for TarGzArchiver {
    async fn create(
        &self,
        source: &Path,
        dest_dir: &Path,
        label: &str,
        exclude: &[PathBuf],
    ) -> anyhow::Result<BackupInfo> {
        let source = source.to_path_buf();
        let dest_dir = dest_dir.to_path_buf();
        let label = label.to_string();
        let mut exclude = exclude.to_vec();
        exclude.push(dest_dir.clone());
        tokio::task::spawn_blocking(move || create_archive(&source, &dest_dir, &label, &exclude))
            .await
            .context("archive task panicked")?
    }

    async fn list(&self, dir: &Path) -> anyhow::Result<Vec<BackupInfo>> {
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || list_archives(&dir))
            .await
            .context("archive task panicked")?
    }

    async fn delete(&self, dir: &Path, name: &str) -> anyhow::Result<()> {
        let path = archive_path(dir, name)?;
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("failed to delete backup {}", path.display()))
    }

    async fn extract(&self, archive: &Path, target: &Path) -> anyhow::Result<()> {
        let archive = archive.to_path_buf();
        let target = target.to_path_buf();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let file = File::open(&archive)
                .with_context(|| format!("failed to open {}", archive.display()))?;
            fs::create_dir_all(&target)?;
            // unpack refuses entries escaping `target`
            tar::Archive::new(GzDecoder::new(BufReader::new(file)))
                .unpack(&target)
                .with_context(|| format!("failed to extract {}", archive.display()))?;
            debug!("extracted {} into {}", archive.display(), target.display());
            Ok(())
        })
        .await
        .context("archive task panicked")?
    }
}

/// Resolves `name` inside `dir`, refusing anything that is not a plain archive file name.
pub fn archive_path(dir: &Path, name: &str) -> anyhow::Result<PathBuf> {
    if !Files::is_plain_file_name(name) || !name.ends_with(ARCHIVE_SUFFIX) {
        bail!("invalid backup name: {}", name);
    }
    Ok(dir.join(name))
}

fn create_archive(
    source: &Path,
    dest_dir: &Path,
    label: &str,
    exclude: &[PathBuf],
) -> anyhow::Result<BackupInfo> {
    fs::create_dir_all(dest_dir)?;
    let source = source
        .canonicalize()
        .with_context(|| format!("backup source {} is missing", source.display()))?;
    let exclude: Vec<PathBuf> = exclude
        .iter()
        .filter_map(|p| p.canonicalize().ok())
        .collect();

    let created_at = Utc::now();
    let base = format!("{}-{}", label, created_at.format("%Y%m%d-%H%M%S"));
    let mut name = format!("{}{}", base, ARCHIVE_SUFFIX);
    let mut n = 1;
    while dest_dir.join(&name).exists() {
        name = format!("{}-{}{}", base, n, ARCHIVE_SUFFIX);
        n += 1;
    }
    let final_path = dest_dir.join(&name);
    let tmp_path = dest_dir.join(format!(".{}.tmp", name));

    let written = write_archive(&source, &tmp_path, &exclude);
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(err).context(format!("failed to archive {}", source.display()));
    }
    fs::rename(&tmp_path, &final_path)?;

    let size = fs::metadata(&final_path)?.len();
    debug!("backup {} written ({} bytes)", final_path.display(), size);
    Ok(BackupInfo {
        name,
        size,
        created_at,
    })
}

fn write_archive(source: &Path, tmp_path: &Path, exclude: &[PathBuf]) -> anyhow::Result<()> {
    let file = File::create(tmp_path)?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    append_tree(&mut builder, source, Path::new(""), exclude)?;

    let mut writer = builder.into_inner()?.finish()?;
    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

fn append_tree<W: Write>(
    builder: &mut tar::Builder<W>,
    dir: &Path,
    relative: &Path,
    exclude: &[PathBuf],
) -> io::Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        if exclude.iter().any(|ex| path.starts_with(ex)) {
            continue;
        }
        let name = relative.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            builder.append_dir(&name, &path)?;
            append_tree(builder, &path, &name, exclude)?;
        } else if file_type.is_file() {
            builder.append_path_with_name(&path, &name)?;
        }
    }
    Ok(())
}

fn list_archives(dir: &Path) -> anyhow::Result<Vec<BackupInfo>> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut backups = vec![];
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || !name.ends_with(ARCHIVE_SUFFIX) {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let created_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        backups.push(BackupInfo {
            name,
            size: metadata.len(),
            created_at,
        });
    }
    backups.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.name.cmp(&a.name)));
    Ok(backups)
}
