//! Read-only client for the archival description service.
//!
//! Supplies the descriptive title and date display for an origin identifier.
//! Looked up once at prepare time and stored on the bag record, so nothing
//! downstream (including manifest recreation) needs this service again.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::DescribeConfig;
use crate::error::{ConfigError, DescribeError};

#[derive(Debug, Clone, PartialEq)]
pub struct Description {
    pub title: String,
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DescriptionResponse {
    title: String,
    #[serde(default)]
    date: Option<String>,
}

pub struct DescribeClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
}

impl DescribeClient {
    pub fn new(config: &DescribeConfig) -> Result<Self, ConfigError> {
        let token = match &config.token {
            Some(source) => Some(source.resolve().map_err(|e| ConfigError::Secret {
                name: "describe.token".to_string(),
                source: e,
            })?),
            None => None,
        };

        Ok(Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            token,
        })
    }

    fn object_url(&self, identifier: &str) -> String {
        format!("{}/objects/{}", self.base_url, identifier)
    }

    pub async fn lookup(&self, identifier: &str) -> Result<Description, DescribeError> {
        let mut request = self.http.get(self.object_url(identifier));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(|e| DescribeError::Request {
            identifier: identifier.to_string(),
            source: e,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DescribeError::Status {
                identifier: identifier.to_string(),
                status,
            });
        }

        let body: DescriptionResponse =
            response.json().await.map_err(|e| DescribeError::Parse {
                identifier: identifier.to_string(),
                source: e,
            })?;

        Ok(Description {
            title: body.title,
            date: body.date,
        })
    }
}
