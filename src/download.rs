// Downloader: maps media items onto the output tree and streams each
// response body to disk.

use crate::api::ApiClient;
use anyhow::{Context, Result};
use reqwest::Url;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Extension used when the URL carries none.
pub const DEFAULT_EXTENSION: &str = "png";

/// A single file to fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub campaign: String,
    pub deployment_id: i64,
    pub media_id: i64,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// File written, with its size in bytes.
    Written(u64),
    /// File already on disk and left untouched.
    Skipped,
}

/// Writes files under `<root>/<campaign>/<deployment_id>/`.
#[derive(Debug, Clone)]
pub struct Downloader {
    root: PathBuf,
    skip_existing: bool,
}

impl Downloader {
    pub fn new(root: impl Into<PathBuf>, skip_existing: bool) -> Self {
        Downloader {
            root: root.into(),
            skip_existing,
        }
    }

    pub fn deployment_dir(&self, campaign: &str, deployment_id: i64) -> PathBuf {
        self.root
            .join(sanitize_component(campaign))
            .join(deployment_id.to_string())
    }

    /// Local path of a target. Only depends on campaign, deployment, media
    /// id and the URL's extension, so re-runs land on the same files.
    pub fn path_for(&self, target: &Target) -> PathBuf {
        self.deployment_dir(&target.campaign, target.deployment_id)
            .join(format!("{}.{}", target.media_id, extension_from_url(&target.url)))
    }

    /// Fetch one file. The body goes to a `.part` file first and is renamed
    /// into place once complete.
    pub fn download(&self, api: &ApiClient, target: &Target) -> Result<Outcome> {
        let path = self.path_for(target);
        if self.skip_existing && fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false) {
            return Ok(Outcome::Skipped);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut res = api.fetch(&target.url)?;
        let partial = partial_path(&path);
        let written = (|| -> Result<u64> {
            let mut file = File::create(&partial)
                .with_context(|| format!("Failed to create {}", partial.display()))?;
            let n = io::copy(&mut res, &mut file)
                .with_context(|| format!("Failed to write {}", partial.display()))?;
            file.flush()?;
            Ok(n)
        })();

        match written {
            Ok(n) => match fs::rename(&partial, &path) {
                Ok(()) => Ok(Outcome::Written(n)),
                Err(e) => {
                    let _ = fs::remove_file(&partial);
                    Err(e).with_context(|| format!("Failed to move file into {}", path.display()))
                }
            },
            Err(e) => {
                let _ = fs::remove_file(&partial);
                Err(e)
            }
        }
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Make a campaign name usable as a single directory name. Anything
/// outside `[A-Za-z0-9-_.~]` is percent-encoded, so distinct names always
/// map to distinct directories.
pub fn sanitize_component(name: &str) -> String {
    match name {
        // A lone `%` never comes out of percent-encoding.
        "" => "%".to_string(),
        "." => "%2E".to_string(),
        ".." => "%2E%2E".to_string(),
        _ => urlencoding::encode(name).into_owned(),
    }
}

/// Lowercased extension of the URL's last path segment.
pub fn extension_from_url(url: &str) -> String {
    let url = url.trim();
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    path.rsplit('/')
        .next()
        .and_then(|segment| segment.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}
