//! ContentDirectory client
//!
//! [`ContentDirectory`] is the seam the browse engine talks to;
//! [`UpnpContentDirectory`] is its SOAP implementation.

use std::time::Duration;

use theiadidl::DIDLLite;
use theiaupnp::soap::{SoapEnvelope, UpnpError, parse_soap_fault, response_argument};
use tracing::debug;

use crate::error::{BrowseError, Result};
use crate::soap_client::{SoapClient, SoapReply};

/// Prefix shared by every ContentDirectory service type
pub const CONTENT_DIRECTORY_URN: &str = "urn:schemas-upnp-org:service:ContentDirectory:";

/// One page of a `BrowseDirectChildren` answer
#[derive(Debug, Clone, Default)]
pub struct BrowsePage {
    pub didl: DIDLLite,
    pub number_returned: u32,
    pub total_matches: u32,
    pub update_id: u32,
}

pub trait ContentDirectory: Send + Sync {
    /// Direct children of `object_id`, starting at index `start`
    fn browse(&self, object_id: &str, start: u32, count: u32) -> Result<BrowsePage>;

    /// Raw `FeatureList` document of the vendor `X_GetFeatureList` action
    fn get_feature_list(&self) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct UpnpContentDirectory {
    udn: String,
    soap: SoapClient,
}

impl UpnpContentDirectory {
    pub fn new(udn: &str, control_url: &str, service_type: &str, timeout: Duration) -> Self {
        Self {
            udn: udn.to_string(),
            soap: SoapClient::new(control_url, service_type, timeout),
        }
    }

    pub fn udn(&self) -> &str {
        &self.udn
    }

    pub fn control_url(&self) -> &str {
        self.soap.control_url()
    }

    fn invoke(&self, action: &str, args: &[(&str, &str)]) -> Result<SoapEnvelope> {
        let reply = self.soap.call(action, args)?;
        check_reply(action, reply)
    }
}

/// Turns HTTP errors and SOAP faults into [`BrowseError`]s
fn check_reply(action: &str, reply: SoapReply) -> Result<SoapEnvelope> {
    if !reply.status.is_success() {
        if let Some(err) = reply.envelope.as_ref().and_then(upnp_error) {
            return Err(action_error(action, err));
        }

        return Err(BrowseError::HttpStatus {
            action: action.to_string(),
            status: reply.status.as_u16(),
            body: reply.body,
        });
    }

    let envelope = reply
        .envelope
        .ok_or_else(|| BrowseError::MissingReturnValue(format!("{} envelope", action)))?;

    // some servers answer 200 with a fault inside
    if let Some(err) = upnp_error(&envelope) {
        return Err(action_error(action, err));
    }

    Ok(envelope)
}

fn upnp_error(envelope: &SoapEnvelope) -> Option<UpnpError> {
    parse_soap_fault(envelope).and_then(|fault| fault.upnp_error)
}

fn action_error(action: &str, err: UpnpError) -> BrowseError {
    BrowseError::Action {
        action: action.to_string(),
        code: err.error_code,
        description: err.error_description,
    }
}

fn required_argument(envelope: &SoapEnvelope, response: &str, name: &str) -> Result<String> {
    response_argument(envelope, response, name)
        .ok_or_else(|| BrowseError::MissingReturnValue(name.to_string()))
}

fn numeric_argument(envelope: &SoapEnvelope, response: &str, name: &str) -> Result<u32> {
    let raw = required_argument(envelope, response, name)?;
    raw.trim()
        .parse()
        .map_err(|_| BrowseError::BadReturnValue(name.to_string(), raw))
}

/// Decodes a `BrowseResponse` envelope
pub fn parse_browse_response(envelope: &SoapEnvelope) -> Result<BrowsePage> {
    let result = required_argument(envelope, "BrowseResponse", "Result")?;
    let didl = if result.trim().is_empty() {
        DIDLLite::default()
    } else {
        DIDLLite::parse(&result)?
    };

    let number_returned = numeric_argument(envelope, "BrowseResponse", "NumberReturned")?;
    let total_matches = numeric_argument(envelope, "BrowseResponse", "TotalMatches")?;
    // UpdateID is optional in practice
    let update_id = numeric_argument(envelope, "BrowseResponse", "UpdateID").unwrap_or(0);

    Ok(BrowsePage {
        didl,
        number_returned,
        total_matches,
        update_id,
    })
}

impl ContentDirectory for UpnpContentDirectory {
    fn browse(&self, object_id: &str, start: u32, count: u32) -> Result<BrowsePage> {
        let start_str = start.to_string();
        let count_str = count.to_string();
        let args = [
            ("ObjectID", object_id),
            ("BrowseFlag", "BrowseDirectChildren"),
            ("Filter", "*"),
            ("StartingIndex", start_str.as_str()),
            ("RequestedCount", count_str.as_str()),
            ("SortCriteria", ""),
        ];

        debug!(
            server = self.udn.as_str(),
            object_id, start, count, "Browse"
        );
        let envelope = self.invoke("Browse", &args)?;
        parse_browse_response(&envelope)
    }

    fn get_feature_list(&self) -> Result<String> {
        let envelope = self.invoke("X_GetFeatureList", &[])?;
        required_argument(&envelope, "X_GetFeatureListResponse", "FeatureList")
    }
}
