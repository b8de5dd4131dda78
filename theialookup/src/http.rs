//! JSON over HTTP, behind the shared rate limiter

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use ureq::Agent;
use ureq::http::Response;

use crate::error::{LookupError, Result};
use crate::rate_limiter::RateLimiter;

pub(crate) struct JsonClient {
    agent: Agent,
    limiter: Arc<RateLimiter>,
}

impl JsonClient {
    pub(crate) fn new(limiter: Arc<RateLimiter>, timeout: Duration) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Self { agent, limiter }
    }

    pub(crate) fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<T> {
        debug!("GET {} with {} params", url, query.len());

        let mut request = self.agent.get(url).header("Accept", "application/json");
        for (key, value) in query {
            request = request.query(*key, *value);
        }
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let _permit = self.limiter.acquire();
        handle_response(request.call()?)
    }

    pub(crate) fn post<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &serde_json::Value,
        headers: &[(&str, &str)],
    ) -> Result<T> {
        debug!("POST {}", url);

        let mut request = self
            .agent
            .post(url)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json");
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let payload = serde_json::to_string(body)?;

        // held until the body is read
        let _permit = self.limiter.acquire();
        handle_response(request.send(payload)?)
    }
}

fn handle_response<T: DeserializeOwned>(mut response: Response<ureq::Body>) -> Result<T> {
    let status = response.status();
    let text = response.body_mut().read_to_string()?;

    if !status.is_success() {
        warn!("API error ({}): {}", status.as_u16(), text);
        return Err(LookupError::from_status_code(status.as_u16(), text));
    }

    serde_json::from_str(&text).map_err(|e| {
        warn!("Failed to parse response: {}", e);
        LookupError::Json(e)
    })
}
