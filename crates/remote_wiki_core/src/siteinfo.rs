use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{SiteInfoApi, SiteInfoProp};

pub const EMPTY_VERSION_MESSAGE: &str = "ERROR: empty version response";
pub const EMPTY_EXTENSIONS_MESSAGE: &str = "ERROR: empty extensions response";

/// Result of one remote query before it is rendered into page text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome<T> {
    Found(T),
    /// The remote answered but had nothing usable.
    Empty,
    /// Transport, HTTP, API or decoding failure, with its message.
    Failed(String),
}

/// Both renderings of the remote extension list, computed from one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionSummary {
    /// `name:version` pairs joined with `,`.
    pub versions: String,
    /// `name:url` pairs joined with `|`, since `,` may appear inside URLs.
    pub urls: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExtensionRecord {
    #[serde(default)]
    pub name: String,
    pub version: Option<String>,
    #[serde(rename = "vcs-version")]
    pub vcs_version: Option<String>,
    pub url: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl ExtensionRecord {
    fn is_skin(&self) -> bool {
        self.kind.as_deref() == Some("skin")
    }

    fn version_pair(&self) -> String {
        let version = self
            .version
            .as_deref()
            .or(self.vcs_version.as_deref())
            .unwrap_or("?");
        format!("{}:{version}", self.name)
    }

    fn url_pair(&self) -> String {
        format!("{}:{}", self.name, self.url.as_deref().unwrap_or("?"))
    }
}

pub fn fetch_generator(api: &dyn SiteInfoApi) -> QueryOutcome<String> {
    let version = api
        .site_info(SiteInfoProp::General)
        .and_then(parse_generator);
    match version {
        Ok(version) if version.is_empty() => QueryOutcome::Empty,
        Ok(version) => QueryOutcome::Found(version),
        Err(error) => QueryOutcome::Failed(format!("{error:#}")),
    }
}

pub fn fetch_extensions(api: &dyn SiteInfoApi) -> QueryOutcome<ExtensionSummary> {
    let records = api
        .site_info(SiteInfoProp::Extensions)
        .and_then(parse_extensions);
    match records {
        Ok(records) if records.is_empty() => QueryOutcome::Empty,
        Ok(records) => QueryOutcome::Found(summarize_extensions(&records)),
        Err(error) => QueryOutcome::Failed(format!("{error:#}")),
    }
}

/// Keeps only digits and periods: `MediaWiki 1.41.0-wmf.123` becomes `1.41.0.123`.
pub fn clean_version(generator: &str) -> String {
    generator
        .chars()
        .filter(|ch| ch.is_ascii_digit() || *ch == '.')
        .collect()
}

/// Skins are dropped; input order is kept.
pub fn summarize_extensions(records: &[ExtensionRecord]) -> ExtensionSummary {
    let (versions, urls): (Vec<String>, Vec<String>) = records
        .iter()
        .filter(|record| !record.is_skin())
        .map(|record| (record.version_pair(), record.url_pair()))
        .unzip();
    ExtensionSummary {
        versions: versions.join(","),
        urls: urls.join("|"),
    }
}

fn parse_generator(payload: Value) -> Result<String> {
    let response: GeneralResponse =
        serde_json::from_value(payload).context("malformed siteinfo general response")?;
    Ok(clean_version(&response.query.general.generator))
}

fn parse_extensions(payload: Value) -> Result<Vec<ExtensionRecord>> {
    let response: ExtensionsResponse =
        serde_json::from_value(payload).context("malformed siteinfo extensions response")?;
    Ok(response.query.extensions)
}

#[derive(Debug, Deserialize, Default)]
struct GeneralResponse {
    #[serde(default)]
    query: GeneralQuery,
}

#[derive(Debug, Deserialize, Default)]
struct GeneralQuery {
    #[serde(default)]
    general: GeneralInfo,
}

#[derive(Debug, Deserialize, Default)]
struct GeneralInfo {
    #[serde(default)]
    generator: String,
}

#[derive(Debug, Deserialize, Default)]
struct ExtensionsResponse {
    #[serde(default)]
    query: ExtensionsQuery,
}

#[derive(Debug, Deserialize, Default)]
struct ExtensionsQuery {
    #[serde(default)]
    extensions: Vec<ExtensionRecord>,
}
