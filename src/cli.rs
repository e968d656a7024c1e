// Command-line arguments and their resolution into `Settings`.

use crate::api::DEFAULT_RESULTS_PER_PAGE;
use crate::app::Settings;
use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Url;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const DEFAULT_URL: &str = "https://soi.squidle.org";
pub const DEFAULT_OUTPUT: &str = ".";
pub const TOKEN_FILE_NAME: &str = ".squidle_token";

#[derive(Parser, Debug)]
#[command(version, about = "Download campaign images and navigation data from a Squidle instance")]
pub struct Cli {
    /// User API token to access private data. Not needed for public datasets
    #[arg(long, env = "SQUIDLE_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Campaign names (e.g. dy108-109_nerc_oceanids_class)
    #[arg(long, required = true, num_args = 1..)]
    pub campaign: Vec<String>,

    /// URL of the Squidle instance
    #[arg(long, env = "SQUIDLE_URL", default_value = DEFAULT_URL)]
    pub url: String,

    /// Output folder. Defaults to the current directory
    #[arg(long, default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// Page size used when listing deployments and media
    #[arg(long, default_value_t = DEFAULT_RESULTS_PER_PAGE, value_parser = clap::value_parser!(u32).range(1..))]
    pub results_per_page: u32,

    /// Keep files that already exist instead of downloading them again
    #[arg(long)]
    pub skip_existing: bool,

    /// Only write the CSV manifests, do not fetch images
    #[arg(long)]
    pub no_download: bool,
}

impl Cli {
    pub fn parse_args() -> Cli {
        Cli::parse()
    }

    /// Validate the URL and resolve the token. Without `--api-token` the
    /// token file in the home directory is used if present.
    pub fn into_settings(self) -> Result<Settings> {
        let url = self.url.trim().trim_end_matches('/').to_string();
        Url::parse(&url).with_context(|| format!("Invalid --url: {url}"))?;

        let token = match self.api_token.filter(|t| !t.trim().is_empty()) {
            Some(t) => Some(t.trim().to_string()),
            None => match dirs::home_dir() {
                Some(home) => read_token_file(&home.join(TOKEN_FILE_NAME))?,
                None => None,
            },
        };

        Ok(Settings {
            url,
            token,
            campaigns: self.campaign,
            output: self.output,
            results_per_page: self.results_per_page,
            skip_existing: self.skip_existing,
            download: !self.no_download,
        })
    }
}

/// Read a token from disk. A missing or blank file is no token.
pub fn read_token_file(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(data) => {
            let token = data.trim();
            Ok((!token.is_empty()).then(|| token.to_string()))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read token file {}", path.display())),
    }
}
