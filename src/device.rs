//! HTTP access to the PVR's built-in web server.
//!
//! The device serves its recording list as `index.txt` and each recording's
//! metadata as `header.tvwiz` next to the media files. It rejects a literal
//! `+` in the request path and only accepts `%2B`, so paths are escaped here
//! before they reach the HTTP client.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;

use crate::config::{Config, DeviceConfig};
use crate::error::ArchiveError;
use crate::header;
use crate::index::parse_device_index;
use crate::models::IndexEntry;
use crate::naming;

pub const INDEX_FILE: &str = "index.txt";
pub const HEADER_FILE: &str = "header.tvwiz";

pub struct DeviceClient {
    base_url: String,
    client: reqwest::Client,
}

impl DeviceClient {
    pub fn new(config: &DeviceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let mut base_url = config.url.clone();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Ok(Self { base_url, client })
    }

    /// GET a path relative to the device root.
    pub async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}{}",
            self.base_url,
            escape_device_path(path.trim_start_matches('/'))
        );
        tracing::debug!(%url, "GET");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ArchiveError::collaborator("device", e.to_string()))
            .with_context(|| format!("requesting {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let detail = format!("HTTP {} for {}", status, url);
            return Err(ArchiveError::collaborator("device", detail).into());
        }

        let body = response
            .bytes()
            .await
            .with_context(|| format!("reading body of {}", url))?;
        Ok(body.to_vec())
    }

    pub async fn fetch_index(&self) -> Result<String> {
        let body = self.get(INDEX_FILE).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// The raw `header.tvwiz` stored alongside `entry.full_path`.
    pub async fn fetch_header(&self, entry: &IndexEntry) -> Result<Vec<u8>> {
        self.get(&header_path(entry)).await
    }
}

/// `<dir of full_path>/header.tvwiz`
pub fn header_path(entry: &IndexEntry) -> String {
    match entry.full_path.rsplit_once('/') {
        Some((dir, _)) => format!("{}/{}", dir, HEADER_FILE),
        None => HEADER_FILE.to_string(),
    }
}

/// Percent-encode the characters the device (or URL parsing) mangles.
pub fn escape_device_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '%' => out.push_str("%25"),
            '+' => out.push_str("%2B"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            _ => out.push(c),
        }
    }
    out
}

/// `pvr-archive fetch-index`
pub async fn run_fetch_index(config: &Config, output: Option<&Path>) -> Result<()> {
    let client = DeviceClient::new(config.device()?)?;
    let listing = client.fetch_index().await?;

    match output {
        Some(path) => {
            std::fs::write(path, &listing)
                .with_context(|| format!("writing {}", path.display()))?;
            println!(
                "wrote {} entries to {}",
                parse_device_index(&listing).len(),
                path.display()
            );
        }
        None => print!("{}", listing),
    }
    Ok(())
}

/// `pvr-archive inspect`: decode the headers of the first `limit` recordings.
pub async fn run_inspect(config: &Config, limit: usize) -> Result<()> {
    let client = DeviceClient::new(config.device()?)?;
    let listing = client.fetch_index().await?;

    for entry in parse_device_index(&listing).into_iter().take(limit) {
        println!("{}\n{}\n", entry.name, entry.full_path);
        let body = client
            .fetch_header(&entry)
            .await
            .with_context(|| format!("fetching header for {}", entry.name))?;
        print_header(&body).with_context(|| format!("decoding header for {}", entry.name))?;
        println!();
    }
    Ok(())
}

/// `pvr-archive header <file>`
pub fn run_header(path: &Path) -> Result<()> {
    let body = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    print_header(&body).with_context(|| format!("decoding {}", path.display()))
}

fn print_header(body: &[u8]) -> Result<()> {
    let decoded = header::decode_header(body)?;
    println!("{}", decoded.file);
    println!("{}", decoded.point);
    if let Some(start) = decoded.point.broadcast_start() {
        println!(
            "archive name: {}",
            naming::canonical_filename(&decoded.point.event(), start)
        );
    }
    Ok(())
}
