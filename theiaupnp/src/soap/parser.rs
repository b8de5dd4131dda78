//! SOAP envelope parsing and response argument extraction

use super::{SoapBody, SoapEnvelope, SoapHeader};
use std::io::BufReader;
use xmltree::{Element, XMLNode};

/// SOAP parse error
#[derive(Debug, thiserror::Error)]
pub enum SoapParseError {
    #[error("XML parse error: {0}")]
    XmlError(#[from] xmltree::ParseError),

    #[error("Missing SOAP Envelope")]
    MissingEnvelope,

    #[error("Missing SOAP Body")]
    MissingBody,
}

/// Parses a complete SOAP envelope from raw XML bytes
pub fn parse_soap_envelope(xml: &[u8]) -> Result<SoapEnvelope, SoapParseError> {
    let reader = BufReader::new(xml);
    let root = Element::parse(reader)?;

    if !root.name.ends_with("Envelope") {
        return Err(SoapParseError::MissingEnvelope);
    }

    let header = find_child_with_suffix(&root, "Header").map(|e| SoapHeader { content: e.clone() });

    let body_elem = find_child_with_suffix(&root, "Body").ok_or(SoapParseError::MissingBody)?;

    Ok(SoapEnvelope {
        header,
        body: SoapBody {
            content: body_elem.clone(),
        },
    })
}

/// First direct child element whose local name ends with `suffix`
pub fn find_child_with_suffix<'a>(parent: &'a Element, suffix: &str) -> Option<&'a Element> {
    parent.children.iter().find_map(|node| match node {
        XMLNode::Element(elem) if elem.name.ends_with(suffix) => Some(elem),
        _ => None,
    })
}

/// Text of output argument `argument` inside the `<…response>` element
///
/// Returns `None` when the response element or the argument is missing. An
/// argument present but empty yields `Some("")`.
pub fn response_argument(
    envelope: &SoapEnvelope,
    response_suffix: &str,
    argument: &str,
) -> Option<String> {
    let response = find_child_with_suffix(&envelope.body.content, response_suffix)?;
    let elem = response.children.iter().find_map(|node| match node {
        XMLNode::Element(elem) if elem.name == argument => Some(elem),
        _ => None,
    })?;
    Some(elem.get_text().map(|t| t.into_owned()).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BROWSE_RESPONSE: &str = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <u:BrowseResponse xmlns:u="urn:schemas-upnp-org:service:ContentDirectory:1">
      <Result>&lt;DIDL-Lite/&gt;</Result>
      <NumberReturned>0</NumberReturned>
      <TotalMatches>0</TotalMatches>
      <UpdateID>12</UpdateID>
    </u:BrowseResponse>
  </s:Body>
</s:Envelope>"#;

    #[test]
    fn test_parse_browse_response() {
        let envelope = parse_soap_envelope(BROWSE_RESPONSE.as_bytes()).unwrap();
        assert!(envelope.header.is_none());
        assert_eq!(
            response_argument(&envelope, "BrowseResponse", "Result").as_deref(),
            Some("<DIDL-Lite/>")
        );
        assert_eq!(
            response_argument(&envelope, "BrowseResponse", "UpdateID").as_deref(),
            Some("12")
        );
        assert!(response_argument(&envelope, "BrowseResponse", "Missing").is_none());
    }

    #[test]
    fn test_not_an_envelope() {
        let err = parse_soap_envelope(b"<html/>").unwrap_err();
        assert!(matches!(err, SoapParseError::MissingEnvelope));
    }

    #[test]
    fn test_envelope_without_body() {
        let xml = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"/>"#;
        let err = parse_soap_envelope(xml.as_bytes()).unwrap_err();
        assert!(matches!(err, SoapParseError::MissingBody));
    }
}
