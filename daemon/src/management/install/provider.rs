use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use log::debug;
use mcsm_protocol::management::instance::InstanceType;
use url::Url;

use crate::management::config::SERVER_JAR;
use crate::management::minecraft::latest_release;
use crate::storage::Files;
use crate::utils::TtlCache;

pub type Progress<'a> = &'a (dyn Fn(String) + Send + Sync);

/// Resolves versions and delivers runnable artifacts for a server flavor.
#[async_trait::async_trait]
pub trait ArtifactProvider: Send + Sync {
    async fn list_versions(&self, flavor: InstanceType) -> anyhow::Result<Vec<String>>;

    async fn resolve_latest(&self, flavor: InstanceType) -> anyhow::Result<String> {
        let versions = self.list_versions(flavor).await?;
        latest_release(versions.iter().map(String::as_str))
            .map(str::to_string)
            .ok_or_else(|| anyhow!("no release available for {}", flavor))
    }

    /// Places the artifact at `<target_dir>/server.jar` and returns its path.
    async fn fetch(
        &self,
        flavor: InstanceType,
        version: &str,
        source: Option<&str>,
        target_dir: &Path,
        progress: Progress<'_>,
    ) -> anyhow::Result<PathBuf>;
}

/// Serves artifacts from `<cores>/<flavor>/<version>.jar`, verifying an optional
/// `<version>.jar.sha1` sidecar, or copies an explicit `file://` source.
pub struct LocalArtifactProvider {
    cores_root: PathBuf,
    versions: TtlCache<InstanceType, Vec<String>>,
}

impl LocalArtifactProvider {
    pub fn new(cores_root: impl Into<PathBuf>, cache_ttl: Duration) -> Self {
        Self {
            cores_root: cores_root.into(),
            versions: TtlCache::new(cache_ttl),
        }
    }

    fn flavor_dir(&self, flavor: InstanceType) -> PathBuf {
        self.cores_root.join(flavor.as_str())
    }

    fn source_path(source: &str) -> anyhow::Result<PathBuf> {
        match Url::parse(source) {
            Ok(url) => match url.scheme() {
                "file" => url
                    .to_file_path()
                    .map_err(|_| anyhow!("invalid file url: {}", url)),
                _ => bail!("source with unsupported url scheme: {}", url),
            },
            Err(_) => Ok(PathBuf::from(source)),
        }
    }
}

#[async_trait::async_trait]
impl ArtifactProvider for LocalArtifactProvider {
    async fn list_versions(&self, flavor: InstanceType) -> anyhow::Result<Vec<String>> {
        let dir = self.flavor_dir(flavor);
        self.versions
            .get_or_try_insert_with(flavor, || scan_versions(dir))
            .await
    }

    async fn fetch(
        &self,
        flavor: InstanceType,
        version: &str,
        source: Option<&str>,
        target_dir: &Path,
        progress: Progress<'_>,
    ) -> anyhow::Result<PathBuf> {
        let (artifact, checksum) = match source {
            Some(source) => (Self::source_path(source)?, None),
            None => {
                let artifact = self.flavor_dir(flavor).join(format!("{}.jar", version));
                let sidecar = self.flavor_dir(flavor).join(format!("{}.jar.sha1", version));
                (artifact, Some(sidecar))
            }
        };
        if !artifact.is_file() {
            bail!(
                "no artifact for {} {} at {}",
                flavor,
                version,
                artifact.display()
            );
        }

        if let Some(sidecar) = checksum.filter(|p| p.is_file()) {
            progress(format!("verifying {}", artifact.display()));
            let expected = tokio::fs::read_to_string(&sidecar).await?;
            let expected = expected
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_lowercase();
            let actual = Files::get_sha1(&artifact).await?;
            if expected != actual {
                bail!(
                    "checksum mismatch for {}: expected {}, got {}",
                    artifact.display(),
                    expected,
                    actual
                );
            }
        }

        tokio::fs::create_dir_all(target_dir).await?;
        let target = target_dir.join(SERVER_JAR);
        let tmp = target_dir.join(format!("{}.part", SERVER_JAR));
        progress(format!("copying {} {} into {}", flavor, version, target_dir.display()));
        let size = tokio::fs::copy(&artifact, &tmp)
            .await
            .with_context(|| format!("failed to copy {}", artifact.display()))?;
        tokio::fs::rename(&tmp, &target).await?;
        debug!("artifact {} copied ({} bytes)", artifact.display(), size);
        progress(format!("downloaded {} bytes", size));
        Ok(target)
    }
}

/// `<version>.jar` file names in `dir`; a missing directory has no versions.
async fn scan_versions(dir: PathBuf) -> anyhow::Result<Vec<String>> {
    let mut versions = vec![];
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(versions),
        Err(e) => return Err(e).context(format!("failed to list {}", dir.display())),
    };
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(version) = name.strip_suffix(".jar") {
            versions.push(version.to_string());
        }
    }
    versions.sort();
    Ok(versions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::fs;

    fn cores_with(flavor: &str, versions: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let flavor_dir = dir.path().join(flavor);
        fs::create_dir_all(&flavor_dir).unwrap();
        for version in versions {
            fs::write(flavor_dir.join(format!("{}.jar", version)), version.as_bytes()).unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn resolves_latest_release() {
        let cores = cores_with("paper", &["1.19.4", "1.20.4", "24w09a", "1.20"]);
        let provider = LocalArtifactProvider::new(cores.path(), Duration::from_secs(60));
        assert_eq!(
            provider.resolve_latest(InstanceType::Paper).await.unwrap(),
            "1.20.4"
        );
        assert!(provider.resolve_latest(InstanceType::Forge).await.is_err());
    }

    #[tokio::test]
    async fn fetch_copies_and_verifies_checksum() {
        let cores = cores_with("vanilla", &["1.20.4"]);
        fs::write(
            cores.path().join("vanilla/1.20.4.jar.sha1"),
            "0000000000000000000000000000000000000000\n",
        )
        .unwrap();
        let provider = LocalArtifactProvider::new(cores.path(), Duration::from_secs(60));
        let target = tempfile::tempdir().unwrap();
        let noop = |_: String| {};

        let mismatch = provider
            .fetch(InstanceType::Vanilla, "1.20.4", None, target.path(), &noop)
            .await;
        assert!(mismatch.is_err());

        let actual = Files::get_sha1(cores.path().join("vanilla/1.20.4.jar"))
            .await
            .unwrap();
        fs::write(cores.path().join("vanilla/1.20.4.jar.sha1"), actual).unwrap();

        let messages = Mutex::new(vec![]);
        let record = |m: String| messages.lock().push(m);
        let path = provider
            .fetch(InstanceType::Vanilla, "1.20.4", None, target.path(), &record)
            .await
            .unwrap();
        assert_eq!(fs::read(path).unwrap(), b"1.20.4");
        assert!(!messages.lock().is_empty());
    }

    #[tokio::test]
    async fn fetch_from_file_url() {
        let scratch = tempfile::tempdir().unwrap();
        let jar = scratch.path().join("custom.jar");
        fs::write(&jar, b"custom").unwrap();
        let url = Url::from_file_path(&jar).unwrap();

        let provider = LocalArtifactProvider::new(scratch.path().join("cores"), Duration::from_secs(60));
        let target = scratch.path().join("inst");
        let path = provider
            .fetch(
                InstanceType::Fabric,
                "1.20.4",
                Some(url.as_str()),
                &target,
                &|_: String| {},
            )
            .await
            .unwrap();
        assert_eq!(fs::read(path).unwrap(), b"custom");

        assert!(provider
            .fetch(
                InstanceType::Fabric,
                "1.20.4",
                Some("https://example.invalid/server.jar"),
                &target,
                &|_: String| {},
            )
            .await
            .is_err());
    }
}
