use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::{
    error::FetchError,
    source::{FetchOutcome, QuakeSource, parse_listing},
    window::DateWindow,
};

const DATE_PARAM_FORMAT: &str = "%Y-%m-%d";

/// Remote source reached over HTTP with `from`/`to` date parameters.
#[derive(Debug, Clone)]
pub struct HttpQuakeSource {
    api_url: String,
    http: Client,
}

impl HttpQuakeSource {
    /// Every request made through this source is bounded by `timeout`.
    pub fn new(api_url: String, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { api_url, http })
    }

    async fn request(&self, window: &DateWindow) -> Result<FetchOutcome, FetchError> {
        let from = window.first_day().format(DATE_PARAM_FORMAT).to_string();
        let to = window.last_day().format(DATE_PARAM_FORMAT).to_string();

        let res = self
            .http
            .get(&self.api_url)
            .query(&[("from", from.as_str()), ("to", to.as_str())])
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = res.status();
        let body = res.text().await.map_err(|err| {
            if err.is_timeout() {
                FetchError::Timeout(err)
            } else {
                FetchError::Body(err)
            }
        })?;

        if !status.is_success() {
            return Err(FetchError::Status {
                status,
                body: truncate_body(&body),
            });
        }

        parse_listing(&body)
    }
}

#[async_trait]
impl QuakeSource for HttpQuakeSource {
    async fn fetch(&self, window: &DateWindow) -> FetchOutcome {
        match self.request(window).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(
                    window = %window,
                    from = %window.first_day(),
                    to = %window.last_day(),
                    error = %err,
                    "failed to fetch window"
                );
                FetchOutcome::Failed(err)
            }
        }
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}
