//! HTTP transport for the relation endpoints
//!
//! [`RelationApi`] is the seam between the client and the network: the
//! production implementation speaks HTTP, tests substitute in-memory doubles.

use super::types::{ApiEnvelope, ListData, NavData};
use crate::config::ApiConfig;
use crate::graph::Uid;
use crate::{metrics, FollowGraphError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, REFERER};
use serde::de::DeserializeOwned;

const FOLLOWINGS_PATH: &str = "/x/relation/followings";
const FANS_PATH: &str = "/x/relation/fans";
const COMMON_FOLLOWINGS_PATH: &str = "/x/relation/followings/followed_upper";
const NAV_PATH: &str = "/x/web-interface/nav";

/// Raw relation endpoints
///
/// Implementations return the `data` payload of a successful envelope and map
/// every failure to [`FollowGraphError::Remote`]. They never retry and never
/// cache.
#[async_trait]
pub trait RelationApi: Send + Sync {
    /// Identity of the session owner
    async fn nav(&self) -> Result<NavData>;

    /// One page (1-based) of the accounts `uid` follows
    async fn followings(&self, uid: Uid, page_size: u32, page: u32) -> Result<ListData>;

    /// One page (1-based) of the accounts following `uid`
    async fn fans(
        &self,
        uid: Uid,
        page_size: u32,
        page: u32,
        offset: Option<&str>,
    ) -> Result<ListData>;

    /// Accounts followed by both the session owner and `uid`
    async fn common_followings(&self, uid: Uid) -> Result<ListData>;
}

/// reqwest-backed [`RelationApi`]
#[derive(Debug, Clone)]
pub struct HttpRelationApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRelationApi {
    /// Create a client from the `api` config section
    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(ref cookie) = config.cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| FollowGraphError::Config(format!("Invalid cookie: {}", e)))?;
            headers.insert(COOKIE, value);
        }
        headers.insert(REFERER, HeaderValue::from_static("https://www.bilibili.com/"));

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .user_agent(concat!("followgraph/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let result = self.send(path, query).await;
        metrics::record_request(endpoint, result.is_ok());
        if let Err(ref e) = result {
            tracing::debug!(endpoint, error = %e, "Request failed");
        }
        result
    }

    async fn send<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        tracing::trace!(%url, ?query, "GET");

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FollowGraphError::transport(format!("request timed out: {}", url))
                } else {
                    FollowGraphError::transport(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FollowGraphError::transport(format!(
                "unexpected HTTP status {} from {}",
                status, path
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FollowGraphError::transport(format!("failed to read body: {}", e)))?;

        parse_envelope(&body)
    }
}

/// Unwrap a `{code, message, data}` body
pub(crate) fn parse_envelope<T: DeserializeOwned>(body: &str) -> Result<T> {
    let envelope: ApiEnvelope<T> = serde_json::from_str(body)
        .map_err(|e| FollowGraphError::transport(format!("unparsable response: {}", e)))?;

    if envelope.code != 0 {
        let message = if envelope.message.is_empty() {
            "request failed".to_string()
        } else {
            envelope.message
        };
        return Err(FollowGraphError::remote(envelope.code, message));
    }

    envelope
        .data
        .ok_or_else(|| FollowGraphError::transport("response has no data"))
}

#[async_trait]
impl RelationApi for HttpRelationApi {
    async fn nav(&self) -> Result<NavData> {
        self.get("nav", NAV_PATH, &[]).await
    }

    async fn followings(&self, uid: Uid, page_size: u32, page: u32) -> Result<ListData> {
        let query = [
            ("vmid", uid.to_string()),
            ("ps", page_size.to_string()),
            ("pn", page.to_string()),
        ];
        self.get("followings", FOLLOWINGS_PATH, &query).await
    }

    async fn fans(
        &self,
        uid: Uid,
        page_size: u32,
        page: u32,
        offset: Option<&str>,
    ) -> Result<ListData> {
        let mut query = vec![
            ("vmid", uid.to_string()),
            ("ps", page_size.to_string()),
            ("pn", page.to_string()),
        ];
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }
        self.get("fans", FANS_PATH, &query).await
    }

    async fn common_followings(&self, uid: Uid) -> Result<ListData> {
        let query = [("vmid", uid.to_string())];
        self.get("common_followings", COMMON_FOLLOWINGS_PATH, &query)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_envelope_success() {
        let data: ListData =
            parse_envelope(r#"{"code":0,"message":"0","data":{"list":[],"total":0}}"#).unwrap();
        assert!(data.list.is_empty());
    }

    #[test]
    fn test_parse_envelope_api_error() {
        let err = parse_envelope::<ListData>(r#"{"code":-101,"message":"not logged in"}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            FollowGraphError::Remote { code: Some(-101), ref message } if message == "not logged in"
        ));
    }

    #[test]
    fn test_parse_envelope_default_message() {
        let err = parse_envelope::<ListData>(r#"{"code":22115}"#).unwrap_err();
        assert_eq!(err.to_string(), "Remote error (22115): request failed");
    }

    #[test]
    fn test_parse_envelope_garbage() {
        let err = parse_envelope::<ListData>("<html>").unwrap_err();
        assert!(matches!(err, FollowGraphError::Remote { code: None, .. }));
    }

    #[test]
    fn test_from_config_trims_base_url() {
        let config = ApiConfig {
            base_url: "http://localhost:9/".to_string(),
            cookie: Some("SESSDATA=x".to_string()),
            ..Default::default()
        };
        let api = HttpRelationApi::from_config(&config).unwrap();
        assert_eq!(api.base_url(), "http://localhost:9");
    }

    #[test]
    fn test_from_config_rejects_bad_cookie() {
        let config = ApiConfig {
            cookie: Some("a\nb".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            HttpRelationApi::from_config(&config),
            Err(FollowGraphError::Config(_))
        ));
    }
}
