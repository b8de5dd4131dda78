//! SOAP faults carrying UPnP errors

use xmltree::{Element, XMLNode};

use super::{SoapEnvelope, find_child_with_suffix};

/// SOAP Fault
#[derive(Debug, Clone)]
pub struct SoapFault {
    /// Fault code (e.g. "s:Client")
    pub fault_code: String,

    /// Human readable fault string
    pub fault_string: String,

    /// UPnP detail, when the device sent one
    pub upnp_error: Option<UpnpError>,
}

/// UPnP error carried in a fault's `<detail>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpnpError {
    pub error_code: u32,
    pub error_description: String,
}

fn text_child(name: &str, text: &str) -> Element {
    let mut elem = Element::new(name);
    elem.children.push(XMLNode::Text(text.to_string()));
    elem
}

/// Builds a SOAP Fault document
///
/// # Arguments
///
/// * `fault_code` - fault code (e.g. "s:Client")
/// * `fault_string` - error message
/// * `upnp_error` - optional UPnP error code and description
pub fn build_soap_fault(
    fault_code: &str,
    fault_string: &str,
    upnp_error: Option<(u32, &str)>,
) -> Result<String, xmltree::Error> {
    let mut fault = Element::new("s:Fault");
    fault
        .children
        .push(XMLNode::Element(text_child("faultcode", fault_code)));
    fault
        .children
        .push(XMLNode::Element(text_child("faultstring", fault_string)));

    if let Some((code, desc)) = upnp_error {
        let mut detail = Element::new("detail");
        let mut upnp = Element::new("UPnPError");
        upnp.attributes.insert(
            "xmlns".to_string(),
            "urn:schemas-upnp-org:control-1-0".to_string(),
        );
        upnp.children
            .push(XMLNode::Element(text_child("errorCode", &code.to_string())));
        upnp.children
            .push(XMLNode::Element(text_child("errorDescription", desc)));
        detail.children.push(XMLNode::Element(upnp));
        fault.children.push(XMLNode::Element(detail));
    }

    let mut body = Element::new("s:Body");
    body.children.push(XMLNode::Element(fault));

    let mut envelope = Element::new("s:Envelope");
    envelope.attributes.insert(
        "xmlns:s".to_string(),
        "http://schemas.xmlsoap.org/soap/envelope/".to_string(),
    );
    envelope.children.push(XMLNode::Element(body));

    let mut buf = Vec::new();
    envelope.write(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Extracts the fault from an envelope, if the body holds one
pub fn parse_soap_fault(envelope: &SoapEnvelope) -> Option<SoapFault> {
    let fault = find_child_with_suffix(&envelope.body.content, "Fault")?;

    let child_text = |parent: &Element, suffix: &str| {
        find_child_with_suffix(parent, suffix)
            .and_then(|e| e.get_text())
            .map(|t| t.trim().to_string())
    };

    let upnp_error = find_child_with_suffix(fault, "detail")
        .and_then(|detail| find_child_with_suffix(detail, "UPnPError"))
        .and_then(|err| {
            let error_code = child_text(err, "errorCode")?.parse::<u32>().ok()?;
            Some(UpnpError {
                error_code,
                error_description: child_text(err, "errorDescription").unwrap_or_default(),
            })
        });

    Some(SoapFault {
        fault_code: child_text(fault, "faultcode").unwrap_or_default(),
        fault_string: child_text(fault, "faultstring").unwrap_or_default(),
        upnp_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soap::parse_soap_envelope;

    #[test]
    fn test_fault_roundtrip_keeps_upnp_code() {
        let xml = build_soap_fault("s:Client", "UPnPError", Some((801, "Access denied"))).unwrap();
        let envelope = parse_soap_envelope(xml.as_bytes()).unwrap();
        let fault = parse_soap_fault(&envelope).unwrap();

        assert_eq!(fault.fault_code, "s:Client");
        let upnp = fault.upnp_error.unwrap();
        assert_eq!(upnp.error_code, 801);
        assert_eq!(upnp.error_description, "Access denied");
    }

    #[test]
    fn test_fault_without_detail() {
        let xml = build_soap_fault("s:Server", "boom", None).unwrap();
        let envelope = parse_soap_envelope(xml.as_bytes()).unwrap();
        let fault = parse_soap_fault(&envelope).unwrap();
        assert_eq!(fault.fault_string, "boom");
        assert!(fault.upnp_error.is_none());
    }
}
