// Download flow: campaigns -> deployments -> media -> poses -> files.
// Everything runs sequentially on the calling thread. Failures below the
// campaign level are logged and counted, never fatal.

use crate::api::{ApiClient, CampaignNotFound, Deployment};
use crate::download::{Downloader, Outcome, Target};
use crate::filelist::{self, FileListEntry, NavRecord};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Resolved run configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub url: String,
    pub token: Option<String>,
    pub campaigns: Vec<String>,
    pub output: PathBuf,
    pub results_per_page: u32,
    pub skip_existing: bool,
    /// When false only the CSV manifests are written.
    pub download: bool,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Summary {
    pub campaigns_failed: Vec<String>,
    pub deployments_failed: usize,
    pub media_failed: usize,
    pub files_written: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub bytes_written: u64,
}

impl Summary {
    pub fn is_success(&self) -> bool {
        self.campaigns_failed.is_empty()
            && self.deployments_failed == 0
            && self.media_failed == 0
            && self.files_failed == 0
    }
}

fn progress_bar(len: u64, msg: String) -> ProgressBar {
    let pb = ProgressBar::new(len);
    let style = ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} ({eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    pb.set_style(style);
    pb.set_message(msg);
    pb
}

/// Run the whole download for every configured campaign.
pub fn run(api: &ApiClient, settings: &Settings) -> Result<Summary> {
    fs::create_dir_all(&settings.output)
        .with_context(|| format!("Failed to create {}", settings.output.display()))?;
    let downloader = Downloader::new(&settings.output, settings.skip_existing);
    let mut summary = Summary::default();
    let mut entries = Vec::new();

    for campaign in &settings.campaigns {
        info!(campaign = %campaign, "looking for campaign");
        let deployments = match api.find_deployments(campaign) {
            Ok(d) => d,
            Err(err) => {
                if err.downcast_ref::<CampaignNotFound>().is_some() {
                    error!(campaign = %campaign, "campaign not found");
                } else {
                    error!(campaign = %campaign, "campaign lookup failed: {err:#}");
                }
                summary.campaigns_failed.push(campaign.clone());
                continue;
            }
        };
        let ids: Vec<i64> = deployments.iter().map(|d| d.id).collect();
        info!(campaign = %campaign, deployments = ?ids, "found deployments");

        for deployment in &deployments {
            let records = match collect_deployment(api, &downloader, campaign, deployment, &mut summary) {
                Ok(r) => r,
                Err(err) => {
                    error!(deployment = deployment.id, "skipping deployment: {err:#}");
                    summary.deployments_failed += 1;
                    continue;
                }
            };
            if settings.download {
                download_deployment(api, &downloader, campaign, deployment, &records, &mut summary);
            }
            entries.extend(records.into_iter().map(|record| FileListEntry {
                campaign: campaign.clone(),
                record,
            }));
        }
    }

    let list_path = settings.output.join(filelist::FILELIST_NAME);
    filelist::write_filelist(&list_path, &entries)?;
    info!(path = %list_path.display(), images = entries.len(), "stored file list");

    info!(
        written = summary.files_written,
        skipped = summary.files_skipped,
        failed = summary.files_failed,
        bytes = summary.bytes_written,
        "done"
    );
    Ok(summary)
}

/// List a deployment's media, look up each pose and write the
/// deployment's navigation export.
fn collect_deployment(
    api: &ApiClient,
    downloader: &Downloader,
    campaign: &str,
    deployment: &Deployment,
    summary: &mut Summary,
) -> Result<Vec<NavRecord>> {
    info!(deployment = deployment.id, name = deployment.name.as_deref().unwrap_or(""), "looking for images");
    let media = api.list_media(deployment.id)?;

    let pb = progress_bar(media.len() as u64, format!("poses {}", deployment.id));
    let mut records = Vec::with_capacity(media.len());
    for item in &media {
        match api.media_pose(item.id) {
            Ok(pose) => match NavRecord::from_pose(item.id, deployment.id, &pose) {
                Some(record) => records.push(record),
                None => {
                    pb.suspend(|| warn!(media = item.id, "no image url, skipping"));
                    summary.media_failed += 1;
                }
            },
            Err(err) => {
                pb.suspend(|| warn!(media = item.id, "{err:#}"));
                summary.media_failed += 1;
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    let nav_path = downloader
        .deployment_dir(campaign, deployment.id)
        .join(filelist::NAVIGATION_NAME);
    filelist::write_navigation(&nav_path, &records)?;
    info!(deployment = deployment.id, images = records.len(), path = %nav_path.display(), "stored navigation");
    Ok(records)
}

fn download_deployment(
    api: &ApiClient,
    downloader: &Downloader,
    campaign: &str,
    deployment: &Deployment,
    records: &[NavRecord],
    summary: &mut Summary,
) {
    let pb = progress_bar(records.len() as u64, format!("images {}", deployment.id));
    for record in records {
        let target = Target {
            campaign: campaign.to_string(),
            deployment_id: deployment.id,
            media_id: record.image_id,
            url: record.image_url.clone(),
        };
        match downloader.download(api, &target) {
            Ok(Outcome::Written(n)) => {
                summary.files_written += 1;
                summary.bytes_written += n;
            }
            Ok(Outcome::Skipped) => summary.files_skipped += 1,
            Err(err) => {
                pb.suspend(|| warn!(media = record.image_id, url = %record.image_url, "download failed: {err:#}"));
                summary.files_failed += 1;
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();
}
