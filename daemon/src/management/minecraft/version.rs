use anyhow::{anyhow, bail};
use lazy_static::lazy_static;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;

lazy_static! {
    // 1.20 or 1.20.4
    static ref RELEASE_RE: Regex =
        Regex::new(r"^(\d+)\.(\d+)(?:\.(\d+))?$").expect("Failed to compile RELEASE_RE regex");
    // 24w09a
    static ref SNAPSHOT_RE: Regex =
        Regex::new(r"^(\d{2})w(\d{2})([a-z])$").expect("Failed to compile SNAPSHOT_RE regex");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Release {
    major: u16,
    minor: u16,
    patch: u16,
}

impl Release {
    pub fn new(major: u16, minor: u16, patch: Option<u16>) -> Self {
        Self {
            major,
            minor,
            patch: patch.unwrap_or(0),
        }
    }
}

impl Ord for Release {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl PartialOrd for Release {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A game version as published by the vendors: a release or a weekly snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameVersion {
    Release(Release),
    Snapshot { year: u8, week: u8, rev: char },
}

impl TryFrom<&str> for GameVersion {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let value = value.trim();
        if let Some(caps) = RELEASE_RE.captures(value) {
            let part = |i: usize| -> anyhow::Result<u16> {
                caps[i]
                    .parse::<u16>()
                    .map_err(|_| anyhow!("Invalid version component: '{}'", &caps[i]))
            };
            let patch = match caps.get(3) {
                Some(_) => Some(part(3)?),
                None => None,
            };
            return Ok(GameVersion::Release(Release::new(part(1)?, part(2)?, patch)));
        }

        if let Some(caps) = SNAPSHOT_RE.captures(value) {
            let rev = caps[3].chars().next().unwrap_or('a');
            return Ok(GameVersion::Snapshot {
                year: caps[1].parse()?,
                week: caps[2].parse()?,
                rev,
            });
        }

        bail!(
            "Invalid version format: '{}'. Expected format examples: 1.20.4 or 24w09a",
            value
        )
    }
}

impl PartialOrd for GameVersion {
    /// Releases and snapshots are not comparable with each other.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Release(a), Self::Release(b)) => Some(a.cmp(b)),
            (
                Self::Snapshot { year, week, rev },
                Self::Snapshot {
                    year: y,
                    week: w,
                    rev: r,
                },
            ) => Some((year, week, rev).cmp(&(y, w, r))),
            _ => None,
        }
    }
}

impl fmt::Display for GameVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameVersion::Release(r) if r.patch == 0 => write!(f, "{}.{}", r.major, r.minor),
            GameVersion::Release(r) => write!(f, "{}.{}.{}", r.major, r.minor, r.patch),
            GameVersion::Snapshot { year, week, rev } => write!(f, "{:02}w{:02}{}", year, week, rev),
        }
    }
}

/// Greatest release among `versions`; unparsable entries and snapshots are ignored.
/// Returns the original string so vendor spelling (`1.20` vs `1.20.0`) is kept.
pub fn latest_release<'a>(versions: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    versions
        .into_iter()
        .filter_map(|raw| match GameVersion::try_from(raw) {
            Ok(GameVersion::Release(release)) => Some((release, raw)),
            _ => None,
        })
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, raw)| raw)
}
