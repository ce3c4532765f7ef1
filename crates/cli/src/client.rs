// HTTP client for the agify.io age estimation API

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("{name}: HTTP error: {source}")]
    Http {
        name: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{name}: unexpected status {status}")]
    Status { name: String, status: StatusCode },

    #[error("{name}: invalid response body: {source}")]
    Decode {
        name: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Age estimate for a single name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Estimate {
    pub name: String,
    /// `None` when the service has no data for the name
    pub age: Option<u32>,
    #[serde(default)]
    pub count: u64,
}

pub struct AgifyClient {
    base_url: String,
    http: reqwest::Client,
}

impl AgifyClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Look up the estimated age for `name`
    pub async fn lookup(&self, name: &str) -> Result<Estimate, LookupError> {
        let url = format!("{}/", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("name", name)])
            .send()
            .await
            .map_err(|source| LookupError::Http {
                name: name.to_string(),
                source,
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(LookupError::Status {
                name: name.to_string(),
                status,
            });
        }

        let mut estimate: Estimate =
            response.json().await.map_err(|source| LookupError::Decode {
                name: name.to_string(),
                source,
            })?;

        // Report the name as submitted, not as normalized by the service
        estimate.name = name.to_string();
        Ok(estimate)
    }
}
