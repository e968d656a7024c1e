// Library root
// -----------
// The binary (`main.rs`) only parses arguments and sets up logging; the
// work lives in these modules.
//
// Module responsibilities:
// - `cli`: command-line flags, env fallbacks and token lookup.
// - `api`: blocking HTTP client for the Squidle REST API (campaign
//   search, deployment and media listings, media poses).
// - `download`: output path layout and streaming files to disk.
// - `filelist`: CSV navigation exports and the run-level file list.
// - `app`: the sequential campaign -> deployment -> media flow.
pub mod api;
pub mod app;
pub mod cli;
pub mod download;
pub mod filelist;
