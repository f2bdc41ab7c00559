pub mod cache;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod parser_function;
pub mod service;
pub mod siteinfo;

#[cfg(test)]
mod test_support;

pub use cache::{CacheStore, MemoryCache, SqliteCache, make_key};
pub use client::{ClientRegistry, ClientSettings, MediaWikiClient, SiteInfoApi, SiteInfoProp};
pub use config::{BotCredentials, RemoteWikiConfig, load_config};
pub use endpoint::{endpoint_key, validate_endpoint};
pub use parser_function::expand_remote_version;
pub use service::{EXTENSIONS_CACHE_VERSION, QueryKind, RemoteWiki};
pub use siteinfo::{ExtensionSummary, QueryOutcome};
