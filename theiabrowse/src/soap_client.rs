//! SOAP transport for control URLs

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use theiaupnp::soap::{SoapEnvelope, build_soap_request, parse_soap_envelope};
use tracing::trace;
use ureq::Agent;
use ureq::http::StatusCode;

/// What a server answered to one action
///
/// The envelope is `None` when the body is not SOAP; `body` is kept so the
/// caller can still report it.
pub struct SoapReply {
    pub status: StatusCode,
    pub body: String,
    pub envelope: Option<SoapEnvelope>,
}

/// Posts actions of one service to its control URL
///
/// Error statuses do not fail the call: a 500 usually carries the UPnP fault.
#[derive(Clone)]
pub struct SoapClient {
    agent: Agent,
    control_url: String,
    service_type: String,
}

impl fmt::Debug for SoapClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoapClient")
            .field("control_url", &self.control_url)
            .field("service_type", &self.service_type)
            .finish_non_exhaustive()
    }
}

impl SoapClient {
    pub fn new(control_url: &str, service_type: &str, timeout: Duration) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            agent,
            control_url: control_url.to_string(),
            service_type: service_type.to_string(),
        }
    }

    pub fn control_url(&self) -> &str {
        &self.control_url
    }

    pub fn call(&self, action: &str, args: &[(&str, &str)]) -> Result<SoapReply> {
        let request = build_soap_request(&self.service_type, action, args)
            .with_context(|| format!("Cannot encode {} request", action))?;

        let mut response = self
            .agent
            .post(&self.control_url)
            .header("Content-Type", r#"text/xml; charset="utf-8""#)
            .header("SOAPAction", &format!(r#""{}#{}""#, self.service_type, action))
            .send(request)
            .with_context(|| format!("{} to {} failed", action, self.control_url))?;

        let status = response.status();
        let body = response
            .body_mut()
            .read_to_string()
            .with_context(|| format!("Cannot read {} response", action))?;
        trace!(action, %status, body = body.as_str(), "SOAP reply");

        Ok(SoapReply {
            envelope: parse_soap_envelope(body.as_bytes()).ok(),
            status,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_names_the_endpoint() {
        let client = SoapClient::new(
            "http://10.0.0.2:8200/ctl/ContentDir",
            "urn:schemas-upnp-org:service:ContentDirectory:1",
            Duration::from_secs(1),
        );
        let shown = format!("{:?}", client);
        assert!(shown.contains("http://10.0.0.2:8200/ctl/ContentDir"));
        assert!(shown.contains("ContentDirectory:1"));
    }
}
