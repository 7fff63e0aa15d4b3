use anyhow::Result;
use log::debug;
use reqwest::{
    Client, StatusCode, Url,
    header::{self, HeaderMap, HeaderName, HeaderValue},
};
use std::{fmt, future::Future};

/// Moves a license challenge to a license service and brings its answer back.
pub trait LicenseTransport: Send + Sync + 'static {
    fn exchange(&self, challenge: Vec<u8>) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// A license service answered with a non success status code.
#[derive(Debug)]
pub struct StatusError {
    pub status: StatusCode,
    pub body: String,
}

impl StatusError {
    /// Server side failures and rate limiting may go away on their own.
    pub fn is_transient(&self) -> bool {
        self.status.is_server_error() || self.status == StatusCode::TOO_MANY_REQUESTS
    }
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "license request failed ({}): '{}'", self.status, self.body)
    }
}

impl std::error::Error for StatusError {}

/// POSTs challenges to a license url.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    url: Url,
    headers: HeaderMap,
}

impl HttpTransport {
    pub fn new(url: Url) -> Self {
        Self::with_client(Client::new(), url)
    }

    pub fn with_client(client: Client, url: Url) -> Self {
        Self {
            client,
            url,
            headers: HeaderMap::new(),
        }
    }

    /// Add a header in the same `KEY:VALUE` format as curl.
    pub fn header(mut self, value: &str) -> Result<Self> {
        let Some((k, v)) = value.split_once(':') else {
            anyhow::bail!("expected 'KEY:VALUE' but found '{}'", value);
        };

        self.headers
            .insert(k.trim().parse::<HeaderName>()?, v.trim().parse::<HeaderValue>()?);
        Ok(self)
    }
}

impl LicenseTransport for HttpTransport {
    async fn exchange(&self, challenge: Vec<u8>) -> Result<Vec<u8>> {
        debug!("posting {} byte challenge to {}", challenge.len(), self.url);

        let response = self
            .client
            .post(self.url.clone())
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .headers(self.headers.clone())
            .body(challenge)
            .send()
            .await?;
        let status = response.status();

        if status.is_client_error() || status.is_server_error() {
            return Err(StatusError {
                status,
                body: response.text().await.unwrap_or_default(),
            }
            .into());
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curl_style_headers() {
        let transport = HttpTransport::new(Url::parse("https://license.example/wv").unwrap())
            .header("Authorization: Bearer token")
            .unwrap();
        assert_eq!(transport.headers["authorization"], "Bearer token");

        assert!(
            HttpTransport::new(Url::parse("https://license.example/wv").unwrap())
                .header("no separator")
                .is_err()
        );
    }

    #[test]
    fn transient_statuses() {
        let error = |status| StatusError {
            status,
            body: String::new(),
        };

        assert!(error(StatusCode::BAD_GATEWAY).is_transient());
        assert!(error(StatusCode::TOO_MANY_REQUESTS).is_transient());
        assert!(!error(StatusCode::FORBIDDEN).is_transient());
    }
}
