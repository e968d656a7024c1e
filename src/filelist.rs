// CSV manifests: the per-deployment navigation export and the run-level
// file list.

use crate::api::MediaPose;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;

pub const FILELIST_NAME: &str = "filelist.csv";
pub const NAVIGATION_NAME: &str = "navigation.csv";

const NAVIGATION_HEADER: [&str; 8] = [
    "timestamp",
    "lat",
    "lon",
    "dep",
    "alt",
    "image_url",
    "image_id",
    "deployment_id",
];

/// Position, time and URL of one image.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct NavRecord {
    pub timestamp: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub dep: Option<f64>,
    pub alt: Option<f64>,
    pub image_url: String,
    pub image_id: i64,
    pub deployment_id: i64,
}

impl NavRecord {
    /// Build a record from a pose lookup. `None` when the server gave no
    /// image URL.
    pub fn from_pose(media_id: i64, deployment_id: i64, pose: &MediaPose) -> Option<Self> {
        let image_url = pose.image_url()?.to_string();
        let p = pose.pose.clone().unwrap_or_default();
        Some(NavRecord {
            timestamp: p.timestamp,
            lat: p.lat,
            lon: p.lon,
            dep: p.dep,
            alt: p.alt,
            image_url,
            image_id: media_id,
            deployment_id,
        })
    }
}

/// A navigation record tagged with the campaign it was found under.
#[derive(Debug, Clone, PartialEq)]
pub struct FileListEntry {
    pub campaign: String,
    pub record: NavRecord,
}

#[derive(Serialize)]
struct FileListRow<'a> {
    campaign: &'a str,
    timestamp: Option<&'a str>,
    lat: Option<f64>,
    lon: Option<f64>,
    dep: Option<f64>,
    alt: Option<f64>,
    image_url: &'a str,
    image_id: i64,
    deployment_id: i64,
}

impl<'a> From<&'a FileListEntry> for FileListRow<'a> {
    fn from(e: &'a FileListEntry) -> Self {
        FileListRow {
            campaign: &e.campaign,
            timestamp: e.record.timestamp.as_deref(),
            lat: e.record.lat,
            lon: e.record.lon,
            dep: e.record.dep,
            alt: e.record.alt,
            image_url: &e.record.image_url,
            image_id: e.record.image_id,
            deployment_id: e.record.deployment_id,
        }
    }
}

fn writer(path: &Path) -> Result<csv::Writer<fs::File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))
}

/// Write the navigation export of one deployment. The header is written
/// even when there are no rows.
pub fn write_navigation(path: &Path, records: &[NavRecord]) -> Result<()> {
    let mut wtr = writer(path)?;
    wtr.write_record(NAVIGATION_HEADER)?;
    for record in records {
        wtr.serialize(record)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    wtr.flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Write the run-level list of every image found, across campaigns.
pub fn write_filelist(path: &Path, entries: &[FileListEntry]) -> Result<()> {
    let mut wtr = writer(path)?;
    wtr.write_record(std::iter::once("campaign").chain(NAVIGATION_HEADER))?;
    for entry in entries {
        wtr.serialize(FileListRow::from(entry))
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    wtr.flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
