//! Reading host inventories and jump host maps from disk.

use std::path::Path;

use color_eyre::eyre::{Result, WrapErr};
use libfleet::inventory::{HostDescriptor, JumpHostMap};
use libfleet::log::*;
use serde::de::DeserializeOwned;
use tokio::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Csv,
    Json,
    Yaml,
}

impl Format {
    /// `.csv` and `.json` go by their extension; anything else is read as YAML.
    pub fn for_path<P: AsRef<Path>>(path: P) -> Self {
        match path.as_ref().extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Format::Csv,
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Yaml,
        }
    }
}

/// Parse a whole document. CSV only holds flat rows, see [`parse_rows`].
pub fn parse<T: DeserializeOwned>(contents: &str, format: Format) -> Result<T> {
    match format {
        Format::Json => serde_json::from_str(contents).wrap_err("deserializing JSON"),
        Format::Yaml => serde_yaml::from_str(contents).wrap_err("deserializing YAML"),
        Format::Csv => Err(eyre!("CSV only holds host rows; use JSON or YAML")),
    }
}

/// Parse a list of records. For CSV the first line names the columns; empty
/// cells read as absent and unknown columns are ignored.
pub fn parse_rows<T: DeserializeOwned>(contents: &str, format: Format) -> Result<Vec<T>> {
    if format != Format::Csv {
        return parse(contents, format);
    }
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(contents.as_bytes());
    reader
        .deserialize::<T>()
        .enumerate()
        .map(|(i, row)| row.wrap_err_with(|| format!("deserializing CSV row {}", i + 1)))
        .collect()
}

async fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .await
        .wrap_err_with(|| format!("Failed reading {}", path.display()))
}

/// A list of host records, one per host job.
#[tracing::instrument]
pub async fn read_hosts(path: &Path) -> Result<Vec<HostDescriptor>> {
    info!("loading: {}", path.display());
    let contents = read_to_string(path).await?;
    let hosts: Vec<HostDescriptor> = parse_rows(&contents, Format::for_path(path))
        .wrap_err_with(|| format!("Failed parsing {}", path.display()))?;
    info!("loaded {} hosts from {}", hosts.len(), path.display());
    Ok(hosts)
}

/// A map of jump host name to credentials.
#[tracing::instrument]
pub async fn read_jumphosts(path: &Path) -> Result<JumpHostMap> {
    let contents = read_to_string(path).await?;
    let jumphosts: JumpHostMap = parse(&contents, Format::for_path(path))
        .wrap_err_with(|| format!("Failed parsing {}", path.display()))?;
    debug!("loaded {} jump hosts", jumphosts.len());
    Ok(jumphosts)
}
