//! Sources of tender documents.
//!
//! A `Feed` hands the bridge batches of validated tenders. Malformed
//! documents (bad timestamps, ids containing the auction id separator) fail
//! the poll: they are fatal at this boundary and never reach the planner.
//! An unreachable feed is reported as `BridgeError::Feed` and only fails the
//! current poll.

use std::path::PathBuf;

use reqwest::blocking::Client;
use reqwest::Url;
use serde::Deserialize;

use crate::config::FeedConfig;
use crate::error::{BridgeError, Result};
use crate::retry::{retry, RetryPolicy, Sleeper, ThreadSleeper};
use crate::tender::Tender;

/// Fields requested from the changes feed; everything the planner reads.
pub const OPT_FIELDS: &str = "status,auctionPeriod,lots,procurementMethodType";

pub trait Feed {
    /// The next batch of documents. Empty when there is nothing new.
    fn poll(&mut self) -> Result<Vec<Tender>>;
}

impl<T: Feed + ?Sized> Feed for Box<T> {
    fn poll(&mut self) -> Result<Vec<Tender>> {
        (**self).poll()
    }
}

/// Parse a JSON document holding either a tender array or a
/// `{"data": [...]}` envelope, and validate every tender.
pub fn parse_tenders(json: &str) -> Result<Vec<Tender>> {
    let mut value: serde_json::Value = serde_json::from_str(json)?;
    if let Some(data) = value.get_mut("data") {
        value = data.take();
    }
    let tenders: Vec<Tender> = serde_json::from_value(value)?;
    for tender in &tenders {
        tender.validate()?;
    }
    Ok(tenders)
}

// ---------------------------------------------------------------------------
// FileFeed
// ---------------------------------------------------------------------------

/// Delivers the tenders of one JSON file once, then nothing.
pub struct FileFeed {
    path: PathBuf,
    delivered: bool,
}

impl FileFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delivered: false,
        }
    }
}

impl Feed for FileFeed {
    fn poll(&mut self) -> Result<Vec<Tender>> {
        if self.delivered {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        let tenders = parse_tenders(&data)
            .map_err(|e| BridgeError::MalformedFeed(format!("{}: {e}", self.path.display())))?;
        self.delivered = true;
        Ok(tenders)
    }
}

// ---------------------------------------------------------------------------
// ApiFeed
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FeedPage {
    data: Vec<serde_json::Value>,
    #[serde(default)]
    next_page: Option<NextPage>,
}

#[derive(Debug, Deserialize)]
struct NextPage {
    offset: serde_json::Value,
}

/// Follows the tenders changes feed of the procurement API.
///
/// Each poll fetches one page starting at the offset returned by the
/// previous page, so documents changed since the last poll are delivered
/// again.
pub struct ApiFeed {
    client: Client,
    endpoint: String,
    token: Option<String>,
    page_size: u32,
    offset: Option<String>,
    policy: RetryPolicy,
    sleeper: Box<dyn Sleeper>,
}

impl ApiFeed {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("auction-bridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BridgeError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/api/{}/tenders",
                config.api_server.trim_end_matches('/'),
                config.api_version
            ),
            token: config.api_token.clone().filter(|t| !t.is_empty()),
            page_size: config.page_size,
            offset: None,
            policy: config.retry.clone(),
            sleeper: Box::new(ThreadSleeper),
        })
    }

    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Offset the next poll starts from.
    pub fn offset(&self) -> Option<&str> {
        self.offset.as_deref()
    }

    fn page_url(&self) -> Result<Url> {
        let limit = self.page_size.to_string();
        let mut params = vec![
            ("opt_fields", OPT_FIELDS),
            ("mode", "_all_"),
            ("limit", limit.as_str()),
        ];
        if let Some(offset) = &self.offset {
            params.push(("offset", offset.as_str()));
        }
        Url::parse_with_params(&self.endpoint, &params)
            .map_err(|e| BridgeError::Config(format!("bad feed url '{}': {e}", self.endpoint)))
    }

    fn fetch_page(&self, url: &Url) -> Result<FeedPage> {
        let mut request = self.client.get(url.clone());
        if let Some(token) = &self.token {
            request = request.basic_auth(token, None::<&str>);
        }
        let response = request
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| BridgeError::Feed(e.to_string()))?;
        response
            .json::<FeedPage>()
            .map_err(|e| BridgeError::MalformedFeed(format!("bad feed page: {e}")))
    }
}

impl Feed for ApiFeed {
    fn poll(&mut self) -> Result<Vec<Tender>> {
        let url = self.page_url()?;
        tracing::debug!(%url, "polling tenders feed");
        let page = retry(&self.policy, self.sleeper.as_ref(), |_| self.fetch_page(&url))?;

        let mut tenders = Vec::with_capacity(page.data.len());
        for item in page.data {
            let tender: Tender = serde_json::from_value(item)
                .map_err(|e| BridgeError::MalformedFeed(format!("malformed tender: {e}")))?;
            tender.validate()?;
            tenders.push(tender);
        }

        if let Some(next) = page.next_page {
            self.offset = match next.offset {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Null => self.offset.take(),
                other => Some(other.to_string()),
            };
        }
        Ok(tenders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::time::Duration;
    use tempfile::TempDir;

    struct NoSleep;

    impl Sleeper for NoSleep {
        fn sleep(&self, _delay: Duration) {}
    }

    fn feed_config(server: &str) -> FeedConfig {
        FeedConfig {
            api_server: server.to_string(),
            api_version: "2.5".to_string(),
            api_token: None,
            page_size: 2,
            poll_interval_seconds: 1,
            retry: RetryPolicy {
                initial_delay_ms: 0,
                max_delay_ms: 0,
                multiplier: 2,
                max_attempts: Some(2),
            },
        }
    }

    const PAGE_ONE: &str = r#"{
        "data": [
            {"id": "t1", "dateModified": "2030-01-01T10:00:00+02:00",
             "status": "active.auction",
             "auctionPeriod": {"startDate": "2030-01-02T10:00:00+02:00"}},
            {"id": "t2", "status": "cancelled", "lots": [{"id": "l1", "status": "active"}]}
        ],
        "next_page": {"offset": "2030-01-01T10:00:00.000001+02:00"}
    }"#;

    #[test]
    fn parse_tenders_accepts_array_and_envelope() {
        let list = r#"[{"id":"t1","status":"cancelled"}]"#;
        let envelope = r#"{"data":[{"id":"t1","status":"cancelled"}]}"#;
        assert_eq!(parse_tenders(list).unwrap().len(), 1);
        assert_eq!(parse_tenders(envelope).unwrap().len(), 1);
    }

    #[test]
    fn parse_tenders_rejects_invalid_ids() {
        let bad = r#"[{"id":"t_1","status":"cancelled"}]"#;
        assert!(matches!(
            parse_tenders(bad),
            Err(BridgeError::InvalidDocument { .. })
        ));
    }

    #[test]
    fn file_feed_delivers_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tenders.json");
        std::fs::write(&path, r#"[{"id":"t1","status":"cancelled"}]"#).unwrap();

        let mut feed = FileFeed::new(&path);
        assert_eq!(feed.poll().unwrap().len(), 1);
        assert!(feed.poll().unwrap().is_empty());
    }

    #[test]
    fn file_feed_malformed_timestamp_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tenders.json");
        std::fs::write(
            &path,
            r#"[{"id":"t1","status":"active.auction","auctionPeriod":{"startDate":"soon"}}]"#,
        )
        .unwrap();
        let err = FileFeed::new(&path).poll().unwrap_err();
        assert!(matches!(err, BridgeError::MalformedFeed(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn api_feed_follows_offsets() {
        let mut server = mockito::Server::new();
        let first = server
            .mock("GET", "/api/2.5/tenders")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("mode".into(), "_all_".into()),
                Matcher::UrlEncoded("opt_fields".into(), OPT_FIELDS.into()),
                Matcher::UrlEncoded("limit".into(), "2".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(PAGE_ONE)
            .create();

        let mut feed = ApiFeed::new(&feed_config(&server.url()))
            .unwrap()
            .with_sleeper(Box::new(NoSleep));
        let tenders = feed.poll().unwrap();
        first.assert();
        first.remove();

        assert_eq!(tenders.len(), 2);
        assert_eq!(tenders[0].id, "t1");
        assert_eq!(feed.offset(), Some("2030-01-01T10:00:00.000001+02:00"));

        let second = server
            .mock("GET", "/api/2.5/tenders")
            .match_query(Matcher::UrlEncoded(
                "offset".into(),
                "2030-01-01T10:00:00.000001+02:00".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data": [], "next_page": {"offset": "2030-01-01T10:00:00.000001+02:00"}}"#)
            .create();
        assert!(feed.poll().unwrap().is_empty());
        second.assert();
    }

    #[test]
    fn api_feed_retries_then_fails() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/api/2.5/tenders")
            .match_query(Matcher::Any)
            .with_status(502)
            .expect(2)
            .create();

        let mut feed = ApiFeed::new(&feed_config(&server.url()))
            .unwrap()
            .with_sleeper(Box::new(NoSleep));
        let err = feed.poll().unwrap_err();
        assert!(matches!(err, BridgeError::Feed(_)));
        assert!(err.is_transient());
        mock.assert();
        assert!(feed.offset().is_none());
    }

    #[test]
    fn api_feed_sends_token_as_basic_auth() {
        let mut server = mockito::Server::new();
        // "secret:" base64-encoded
        let mock = server
            .mock("GET", "/api/2.5/tenders")
            .match_query(Matcher::Any)
            .match_header("authorization", "Basic c2VjcmV0Og==")
            .with_status(200)
            .with_body(r#"{"data": []}"#)
            .create();

        let mut cfg = feed_config(&server.url());
        cfg.api_token = Some("secret".into());
        let mut feed = ApiFeed::new(&cfg).unwrap().with_sleeper(Box::new(NoSleep));
        assert!(feed.poll().unwrap().is_empty());
        mock.assert();
    }

    #[test]
    fn api_feed_rejects_malformed_documents() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/api/2.5/tenders")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"data": [{"id": "t1", "status": "active.auction",
                          "auctionPeriod": {"startDate": "yesterday"}}]}"#)
            .create();

        let mut feed = ApiFeed::new(&feed_config(&server.url()))
            .unwrap()
            .with_sleeper(Box::new(NoSleep));
        let err = feed.poll().unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn api_feed_rejects_non_json_page() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/api/2.5/tenders")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create();

        let mut feed = ApiFeed::new(&feed_config(&server.url()))
            .unwrap()
            .with_sleeper(Box::new(NoSleep));
        let err = feed.poll().unwrap_err();
        assert!(matches!(err, BridgeError::MalformedFeed(_)));
    }
}
