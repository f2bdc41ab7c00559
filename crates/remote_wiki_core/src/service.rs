use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::client::{ClientRegistry, SiteInfoApi};
use crate::config::RemoteWikiConfig;
use crate::endpoint::validate_endpoint;
use crate::siteinfo::{
    EMPTY_EXTENSIONS_MESSAGE, EMPTY_VERSION_MESSAGE, ExtensionSummary, QueryOutcome,
    fetch_extensions, fetch_generator,
};

/// Bump whenever the cached shape of extension information changes; older
/// entries then stop matching any key.
pub const EXTENSIONS_CACHE_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Version,
    Extensions,
    ExtensionUrls,
}

impl QueryKind {
    /// Unknown or missing kinds fall back to [`QueryKind::Version`].
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("extensions") => Self::Extensions,
            Some("extension-urls") => Self::ExtensionUrls,
            _ => Self::Version,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Version => "version",
            Self::Extensions => "extensions",
            Self::ExtensionUrls => "extension-urls",
        }
    }
}

/// Extension lookup result: either the summary or the text to render in its place.
enum ExtensionsLookup {
    Summary(ExtensionSummary),
    Rendered(String),
}

pub struct RemoteWiki {
    registry: ClientRegistry,
    cache: Box<dyn CacheStore>,
    cache_ttl: u64,
    verbose: bool,
}

impl RemoteWiki {
    pub fn new(config: &RemoteWikiConfig, cache: Box<dyn CacheStore>) -> Self {
        Self::with_registry(
            ClientRegistry::new(config),
            cache,
            config.cache_ttl(),
            config.verbose(),
        )
    }

    pub fn with_registry(
        registry: ClientRegistry,
        cache: Box<dyn CacheStore>,
        cache_ttl: u64,
        verbose: bool,
    ) -> Self {
        Self {
            registry,
            cache,
            cache_ttl,
            verbose,
        }
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn registry_mut(&mut self) -> &mut ClientRegistry {
        &mut self.registry
    }

    /// Renders `{{#remote_version: endpoint | kind}}`.
    ///
    /// Remote failures come back as `Ok` text (the message when verbose,
    /// otherwise empty). `Err` means the cache backend failed or handed back
    /// an entry that does not match the current extensions schema.
    pub fn remote_version(&mut self, endpoint: &str, kind: Option<&str>) -> Result<String> {
        let endpoint = endpoint.trim();
        if !validate_endpoint(endpoint) {
            debug!(endpoint, "ignoring invalid remote wiki endpoint");
            return Ok(String::new());
        }

        let api = self.registry.get_client(endpoint);
        match QueryKind::parse(kind) {
            QueryKind::Version => self.generator(&api),
            QueryKind::Extensions => Ok(match self.extensions_info(&api)? {
                ExtensionsLookup::Summary(summary) => summary.versions,
                ExtensionsLookup::Rendered(text) => text,
            }),
            QueryKind::ExtensionUrls => Ok(match self.extensions_info(&api)? {
                ExtensionsLookup::Summary(summary) => summary.urls,
                ExtensionsLookup::Rendered(text) => text,
            }),
        }
    }

    fn generator(&self, api: &Arc<dyn SiteInfoApi>) -> Result<String> {
        let key = self
            .cache
            .make_key(&[api.api_url(), QueryKind::Version.as_str()]);
        if let Some(value) = self.cached(&key)? {
            return Ok(value);
        }

        match fetch_generator(api.as_ref()) {
            QueryOutcome::Found(version) => {
                self.store(&key, &version)?;
                Ok(version)
            }
            QueryOutcome::Empty => Ok(self.render_failure(EMPTY_VERSION_MESSAGE)),
            QueryOutcome::Failed(message) => {
                warn!(api_url = api.api_url(), error = %message, "remote version query failed");
                Ok(self.render_failure(&message))
            }
        }
    }

    fn extensions_info(&self, api: &Arc<dyn SiteInfoApi>) -> Result<ExtensionsLookup> {
        let schema = EXTENSIONS_CACHE_VERSION.to_string();
        let key = self
            .cache
            .make_key(&[api.api_url(), QueryKind::Extensions.as_str(), &schema]);
        if let Some(value) = self.cached(&key)? {
            let summary: ExtensionSummary = serde_json::from_str(&value)
                .with_context(|| format!("invalid cached extensions payload under {key}"))?;
            return Ok(ExtensionsLookup::Summary(summary));
        }

        match fetch_extensions(api.as_ref()) {
            QueryOutcome::Found(summary) => {
                let encoded = serde_json::to_string(&summary)
                    .context("failed to encode extensions summary")?;
                self.store(&key, &encoded)?;
                Ok(ExtensionsLookup::Summary(summary))
            }
            QueryOutcome::Empty => Ok(ExtensionsLookup::Rendered(
                self.render_failure(EMPTY_EXTENSIONS_MESSAGE),
            )),
            QueryOutcome::Failed(message) => {
                warn!(api_url = api.api_url(), error = %message, "remote extensions query failed");
                Ok(ExtensionsLookup::Rendered(self.render_failure(&message)))
            }
        }
    }

    fn cached(&self, key: &str) -> Result<Option<String>> {
        if self.cache_ttl == 0 {
            return Ok(None);
        }
        let value = self.cache.get(key)?.filter(|value| !value.is_empty());
        debug!(key, hit = value.is_some(), "remote wiki cache lookup");
        Ok(value)
    }

    fn store(&self, key: &str, value: &str) -> Result<()> {
        if self.cache_ttl == 0 {
            return Ok(());
        }
        self.cache.set(key, value, self.cache_ttl)
    }

    fn render_failure(&self, message: &str) -> String {
        if self.verbose {
            message.to_string()
        } else {
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{Value, json};

    use super::{EXTENSIONS_CACHE_VERSION, QueryKind, RemoteWiki};
    use crate::cache::{CacheStore, MemoryCache, make_key};
    use crate::client::{ClientRegistry, SiteInfoApi};
    use crate::config::RemoteWikiConfig;
    use crate::test_support::FakeApi;

    const MW_API: &str = "https://www.mediawiki.org/w/api.php";

    fn remote(ttl: u64, verbose: bool) -> RemoteWiki {
        RemoteWiki::with_registry(
            ClientRegistry::new(&RemoteWikiConfig::default()),
            Box::new(MemoryCache::new()),
            ttl,
            verbose,
        )
    }

    fn install(remote: &mut RemoteWiki, api: FakeApi) -> Arc<FakeApi> {
        let api = Arc::new(api);
        remote
            .registry_mut()
            .install(MW_API, Arc::clone(&api) as Arc<dyn SiteInfoApi>);
        api
    }

    fn extensions_payload() -> Value {
        json!({"query": {"extensions": [
            {"name": "foo", "version": "123", "url": "https://example.org/foo"},
            {"name": "bar", "vcs-version": "456"},
            {"name": "baz"},
        ]}})
    }

    #[test]
    fn query_kind_defaults_to_version() {
        assert_eq!(QueryKind::parse(None), QueryKind::Version);
        assert_eq!(QueryKind::parse(Some("")), QueryKind::Version);
        assert_eq!(QueryKind::parse(Some("version")), QueryKind::Version);
        assert_eq!(QueryKind::parse(Some("foobar")), QueryKind::Version);
        assert_eq!(QueryKind::parse(Some(" extensions ")), QueryKind::Extensions);
        assert_eq!(
            QueryKind::parse(Some("extension-urls")),
            QueryKind::ExtensionUrls
        );
    }

    #[test]
    fn invalid_endpoints_render_nothing() {
        let mut remote = remote(3600, true);
        for endpoint in ["", ":", "?", "//www.mediawiki.org/w/api.php"] {
            assert_eq!(remote.remote_version(endpoint, None).expect("render"), "");
        }
        assert!(remote.registry_mut().is_empty());
    }

    #[test]
    fn generator_is_cached_when_ttl_is_positive() {
        for (ttl, expected_calls) in [(3600, 1), (0, 2)] {
            let mut remote = remote(ttl, true);
            let api = install(
                &mut remote,
                FakeApi::returning(
                    MW_API,
                    json!({"query": {"general": {"generator": "MediaWiki 1.41.0-wmf.123"}}}),
                ),
            );
            assert_eq!(remote.remote_version(MW_API, None).expect("fetch"), "1.41.0.123");
            assert_eq!(
                remote.remote_version(MW_API, Some("version")).expect("cache"),
                "1.41.0.123"
            );
            assert_eq!(api.request_count(), expected_calls, "ttl {ttl}");
        }
    }

    #[test]
    fn zero_ttl_never_writes_the_cache() {
        let cache = Arc::new(MemoryCache::new());
        let mut remote = RemoteWiki::with_registry(
            ClientRegistry::new(&RemoteWikiConfig::default()),
            Box::new(SharedCache(Arc::clone(&cache))),
            0,
            true,
        );
        install(
            &mut remote,
            FakeApi::returning(MW_API, json!({"query": {"general": {"generator": "1.40"}}})),
        );
        assert_eq!(remote.remote_version(MW_API, None).expect("fetch"), "1.40");
        let key = make_key(&[MW_API, "version"]);
        assert_eq!(cache.get(&key).expect("get"), None);
    }

    #[test]
    fn zero_ttl_never_reads_the_cache() {
        let cache = Arc::new(MemoryCache::new());
        let schema = EXTENSIONS_CACHE_VERSION.to_string();
        cache
            .set(&make_key(&[MW_API, "version"]), "0.0.1", 3600)
            .expect("seed version");
        cache
            .set(
                &make_key(&[MW_API, "extensions", &schema]),
                r#"{"versions":"stale:1","urls":"stale:?"}"#,
                3600,
            )
            .expect("seed extensions");

        let mut remote = RemoteWiki::with_registry(
            ClientRegistry::new(&RemoteWikiConfig::default()),
            Box::new(SharedCache(Arc::clone(&cache))),
            0,
            true,
        );
        let version_api = install(
            &mut remote,
            FakeApi::returning(MW_API, json!({"query": {"general": {"generator": "1.40"}}})),
        );
        assert_eq!(remote.remote_version(MW_API, None).expect("version"), "1.40");
        assert_eq!(version_api.request_count(), 1);

        let extensions_api = install(&mut remote, FakeApi::returning(MW_API, extensions_payload()));
        assert_eq!(
            remote.remote_version(MW_API, Some("extensions")).expect("extensions"),
            "foo:123,bar:456,baz:?"
        );
        assert_eq!(extensions_api.request_count(), 1);
    }

    #[test]
    fn empty_generator_respects_verbosity() {
        for (verbose, expected) in [(true, "ERROR: empty version response"), (false, "")] {
            let mut remote = remote(3600, verbose);
            let api = install(
                &mut remote,
                FakeApi::returning(MW_API, json!({"query": {"general": {"generator": ""}}})),
            );
            assert_eq!(remote.remote_version(MW_API, None).expect("render"), expected);
            assert_eq!(api.request_count(), 1);
        }
    }

    #[test]
    fn generator_errors_respect_verbosity() {
        for (verbose, expected) in [(true, "TESTING!!!"), (false, "")] {
            let mut remote = remote(3600, verbose);
            let api = install(&mut remote, FakeApi::failing(MW_API, "TESTING!!!"));
            assert_eq!(remote.remote_version(MW_API, None).expect("render"), expected);
            assert_eq!(api.request_count(), 1);
        }
    }

    #[test]
    fn failures_are_not_cached() {
        let mut remote = remote(3600, true);
        let api = install(&mut remote, FakeApi::failing(MW_API, "TESTING!!!"));
        remote.remote_version(MW_API, None).expect("first");
        remote.remote_version(MW_API, None).expect("second");
        remote.remote_version(MW_API, Some("extensions")).expect("third");
        remote.remote_version(MW_API, Some("extensions")).expect("fourth");
        assert_eq!(api.request_count(), 4);
    }

    #[test]
    fn extensions_are_cached_when_ttl_is_positive() {
        for (ttl, expected_calls) in [(3600, 1), (0, 2)] {
            let mut remote = remote(ttl, true);
            let api = install(&mut remote, FakeApi::returning(MW_API, extensions_payload()));
            assert_eq!(
                remote.remote_version(MW_API, Some("extensions")).expect("fetch"),
                "foo:123,bar:456,baz:?"
            );
            assert_eq!(
                remote.remote_version(MW_API, Some("extensions")).expect("cache"),
                "foo:123,bar:456,baz:?"
            );
            assert_eq!(api.request_count(), expected_calls, "ttl {ttl}");
        }
    }

    #[test]
    fn extension_urls_share_the_extensions_entry() {
        let mut remote = remote(3600, true);
        let api = install(&mut remote, FakeApi::returning(MW_API, extensions_payload()));
        assert_eq!(
            remote.remote_version(MW_API, Some("extensions")).expect("versions"),
            "foo:123,bar:456,baz:?"
        );
        assert_eq!(
            remote
                .remote_version(MW_API, Some("extension-urls"))
                .expect("urls"),
            "foo:https://example.org/foo|bar:?|baz:?"
        );
        assert_eq!(api.request_count(), 1);
    }

    #[test]
    fn empty_extensions_respect_verbosity() {
        for (verbose, expected) in [(true, "ERROR: empty extensions response"), (false, "")] {
            let mut remote = remote(3600, verbose);
            let api = install(
                &mut remote,
                FakeApi::returning(MW_API, json!({"query": {"extensions": []}})),
            );
            assert_eq!(
                remote.remote_version(MW_API, Some("extensions")).expect("render"),
                expected
            );
            assert_eq!(api.request_count(), 1);
        }
    }

    #[test]
    fn extensions_errors_respect_verbosity() {
        for (verbose, expected) in [(true, "TESTING!!!"), (false, "")] {
            let mut remote = remote(3600, verbose);
            install(&mut remote, FakeApi::failing(MW_API, "TESTING!!!"));
            assert_eq!(
                remote.remote_version(MW_API, Some("extensions")).expect("render"),
                expected
            );
            assert_eq!(
                remote
                    .remote_version(MW_API, Some("extension-urls"))
                    .expect("render"),
                expected
            );
        }
    }

    #[test]
    fn outdated_extension_entries_are_ignored() {
        let cache = Arc::new(MemoryCache::new());
        let stale_key = make_key(&[MW_API, "extensions"]);
        cache.set(&stale_key, "foo:1", 3600).expect("seed");
        let mut remote = RemoteWiki::with_registry(
            ClientRegistry::new(&RemoteWikiConfig::default()),
            Box::new(SharedCache(Arc::clone(&cache))),
            3600,
            true,
        );
        let api = install(&mut remote, FakeApi::returning(MW_API, extensions_payload()));
        assert_eq!(
            remote.remote_version(MW_API, Some("extensions")).expect("fetch"),
            "foo:123,bar:456,baz:?"
        );
        assert_eq!(api.request_count(), 1);
    }

    #[test]
    fn corrupt_extension_entries_are_a_hard_error() {
        let cache = Arc::new(MemoryCache::new());
        let schema = EXTENSIONS_CACHE_VERSION.to_string();
        let key = make_key(&[MW_API, "extensions", &schema]);
        cache.set(&key, "foo:1,bar:2", 3600).expect("seed");
        let mut remote = RemoteWiki::with_registry(
            ClientRegistry::new(&RemoteWikiConfig::default()),
            Box::new(SharedCache(Arc::clone(&cache))),
            3600,
            false,
        );
        let api = install(&mut remote, FakeApi::returning(MW_API, extensions_payload()));
        let error = remote
            .remote_version(MW_API, Some("extensions"))
            .expect_err("must fail");
        assert!(error.to_string().contains("invalid cached extensions payload"));
        assert_eq!(api.request_count(), 0);
    }

    #[test]
    fn equivalent_endpoints_share_cache_entries() {
        let mut remote = remote(3600, true);
        let api = install(
            &mut remote,
            FakeApi::returning(MW_API, json!({"query": {"general": {"generator": "1.40"}}})),
        );
        remote.remote_version(MW_API, None).expect("fetch");
        remote
            .remote_version("http://www.mediawiki.org/w/api.php/", None)
            .expect("cache");
        assert_eq!(api.request_count(), 1);
    }

    struct SharedCache(Arc<MemoryCache>);

    impl CacheStore for SharedCache {
        fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: &str, ttl: u64) -> anyhow::Result<()> {
            self.0.set(key, value, ttl)
        }
    }
}
