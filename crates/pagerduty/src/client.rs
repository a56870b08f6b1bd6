//! HTTP client for the PagerDuty REST API.

use std::sync::Arc;

use reqwest::header::{ACCEPT, AUTHORIZATION, FROM, HeaderMap, HeaderValue};
use reqwest::{Method, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::PagerDutyConfig;
use crate::error::{Error, Result};

/// Media type selecting version 2 of the REST API.
pub const ACCEPT_V2: &str = "application/vnd.pagerduty+json;version=2";

/// Client for the PagerDuty REST API.
///
/// Request and response bodies are wrapped in a single-key object named after
/// the resource, e.g. `{"service": {...}}`.
#[derive(Debug, Clone)]
pub struct PagerDutyClient {
    http: reqwest::Client,
    base_url: Arc<Url>,
}

impl PagerDutyClient {
    /// Create a client from `config`.
    ///
    /// # Errors
    ///
    /// Fails when no token is configured, a header value cannot be encoded,
    /// or the HTTP client cannot be built.
    pub fn new(config: &PagerDutyConfig) -> Result<Self> {
        let token = config
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(Error::MissingToken)?;

        let mut headers = HeaderMap::new();
        let mut authorization = HeaderValue::from_str(&format!("Token token={token}"))
            .map_err(|_| Error::InvalidHeader {
                name: "Authorization",
            })?;
        authorization.set_sensitive(true);
        headers.insert(AUTHORIZATION, authorization);
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_V2));
        if let Some(email) = &config.from_email {
            let from =
                HeaderValue::from_str(email).map_err(|_| Error::InvalidHeader { name: "From" })?;
            headers.insert(FROM, from);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: Arc::new(config.resolved_base_url()?),
        })
    }

    /// The base URL requests are sent to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `POST /{collection}` and return the created object.
    ///
    /// # Errors
    ///
    /// See [`Error`]; non-success statuses map to `NotFound`, `RateLimited`
    /// or `Api`.
    pub async fn create<B, R>(&self, collection: &str, wrapper: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.url(&[collection])?;
        let response = self
            .send(Method::POST, url, Some(wrap(wrapper, body)?))
            .await?;
        unwrap_body(wrapper, response).await
    }

    /// `GET /{collection}/{id}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the object does not exist.
    pub async fn get<R: DeserializeOwned>(
        &self,
        collection: &str,
        wrapper: &str,
        id: &str,
    ) -> Result<R> {
        let url = self.url(&[collection, id])?;
        let response = self.send(Method::GET, url, None).await?;
        unwrap_body(wrapper, response).await
    }

    /// `PUT /{collection}/{id}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the object does not exist.
    pub async fn update<B: Serialize + ?Sized>(
        &self,
        collection: &str,
        wrapper: &str,
        id: &str,
        body: &B,
    ) -> Result<()> {
        let url = self.url(&[collection, id])?;
        self.send(Method::PUT, url, Some(wrap(wrapper, body)?))
            .await?;
        Ok(())
    }

    /// `DELETE /{collection}/{id}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the object does not exist.
    pub async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let url = self.url(&[collection, id])?;
        self.send(Method::DELETE, url, None).await?;
        Ok(())
    }

    /// The base URL with `segments` appended, each percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::clone(&self.base_url);
        url.path_segments_mut()
            .map_err(|()| Error::InvalidBaseUrl {
                url: self.base_url.to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, method: Method, url: Url, body: Option<Value>) -> Result<Response> {
        debug!(%method, %url, "PagerDuty request");
        let path = url.path().to_string();

        let request = self.http.request(method, url);
        let request = match &body {
            Some(body) => request.json(body),
            None => request,
        };
        let response = request.send().await?;
        check_status(&path, response).await
    }
}

fn wrap<B: Serialize + ?Sized>(wrapper: &str, body: &B) -> Result<Value> {
    let mut envelope = serde_json::Map::new();
    envelope.insert(wrapper.to_string(), serde_json::to_value(body)?);
    Ok(Value::Object(envelope))
}

async fn unwrap_body<R: DeserializeOwned>(wrapper: &str, response: Response) -> Result<R> {
    let mut envelope: Value = response.json().await?;
    let inner = envelope
        .get_mut(wrapper)
        .map(Value::take)
        .ok_or_else(|| Error::invalid_response(format!("missing '{wrapper}' object")))?;
    Ok(serde_json::from_value(inner)?)
}

async fn check_status(path: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    debug!(%status, path, "PagerDuty request failed");
    match status {
        StatusCode::NOT_FOUND => Err(Error::NotFound {
            path: path.to_string(),
        }),
        StatusCode::TOO_MANY_REQUESTS => Err(Error::RateLimited),
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(Error::Api {
                status: status.as_u16(),
                body,
            })
        }
    }
}
