use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, bail};
use serde_json::Value;

use crate::client::{SiteInfoApi, SiteInfoProp};

/// Canned `SiteInfoApi` that answers every request the same way and counts calls.
pub struct FakeApi {
    api_url: String,
    response: std::result::Result<Value, String>,
    requests: AtomicUsize,
    props: Mutex<Vec<SiteInfoProp>>,
}

impl FakeApi {
    pub fn returning(api_url: &str, payload: Value) -> Self {
        Self::new(api_url, Ok(payload))
    }

    pub fn failing(api_url: &str, message: &str) -> Self {
        Self::new(api_url, Err(message.to_string()))
    }

    fn new(api_url: &str, response: std::result::Result<Value, String>) -> Self {
        Self {
            api_url: api_url.to_string(),
            response,
            requests: AtomicUsize::new(0),
            props: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn requested_props(&self) -> Vec<SiteInfoProp> {
        self.props.lock().expect("lock").clone()
    }
}

impl SiteInfoApi for FakeApi {
    fn api_url(&self) -> &str {
        &self.api_url
    }

    fn site_info(&self, prop: SiteInfoProp) -> Result<Value> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.props.lock().expect("lock").push(prop);
        match &self.response {
            Ok(payload) => Ok(payload.clone()),
            Err(message) => bail!("{message}"),
        }
    }
}
