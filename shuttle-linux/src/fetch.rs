//! Bus feed over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CACHE_CONTROL;
use serde_json::Value as Json;
use shuttle_core::{FetchError, Query, Source};

pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSource {
    /// `base_url` gets a trailing '/' if it lacks one, so query paths append cleanly.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let mut base_url = base_url.to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Ok(Self { client, base_url })
    }

    fn url(&self, query: &Query) -> String {
        format!("{}{}", self.base_url, query.path())
    }
}

#[async_trait]
impl Source for HttpSource {
    async fn fetch(&self, query: &Query) -> Result<Json, FetchError> {
        let url = self.url(query);
        tracing::debug!(%url, "GET");
        // The feed is live data; never serve a cached copy.
        let resp = self
            .client
            .get(&url)
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn query_paths_join_base_url() {
        let timeout = Duration::from_secs(1);
        let bare = HttpSource::new("http://transport.example/api", timeout).unwrap();
        let slashed = HttpSource::new("http://transport.example/api/", timeout).unwrap();
        assert_eq!(bare.url(&Query::Routes), "http://transport.example/api/Routes");
        assert_eq!(slashed.url(&Query::Routes), "http://transport.example/api/Routes");

        let q = Query::Pattern {
            route_short_name: "40".into(),
            date: NaiveDate::from_ymd_opt(2025, 1, 9).unwrap(),
        };
        assert_eq!(
            bare.url(&q),
            "http://transport.example/api/route/40/pattern/2025-1-9"
        );
    }

    #[tokio::test]
    async fn unreachable_host_is_transport_error() {
        // Port 9 on loopback: nothing listens there.
        let src = HttpSource::new("http://127.0.0.1:9/api", Duration::from_millis(500)).unwrap();
        let err = src.fetch(&Query::Routes).await.unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
    }
}
