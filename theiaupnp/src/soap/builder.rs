//! Construction of SOAP requests and responses

use xmltree::{Element, XMLNode};

fn build_soap_envelope_with_body(body_child: Element) -> Result<String, xmltree::Error> {
    let mut body = Element::new("s:Body");
    body.children.push(XMLNode::Element(body_child));

    let mut envelope = Element::new("s:Envelope");
    envelope.attributes.insert(
        "xmlns:s".to_string(),
        "http://schemas.xmlsoap.org/soap/envelope/".to_string(),
    );
    envelope.attributes.insert(
        "s:encodingStyle".to_string(),
        "http://schemas.xmlsoap.org/soap/encoding/".to_string(),
    );
    envelope.children.push(XMLNode::Element(body));

    let mut buf = Vec::new();
    let config = xmltree::EmitterConfig::new()
        .write_document_declaration(true)
        .perform_indent(true)
        .indent_string("  ");
    envelope.write_with_config(&mut buf, config)?;

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn action_element(name: String, service_urn: &str, args: &[(&str, &str)]) -> Element {
    let mut elem = Element::new(&name);
    elem.attributes
        .insert("xmlns:u".to_string(), service_urn.to_string());

    for (arg, value) in args {
        let mut child = Element::new(arg);
        child.children.push(XMLNode::Text((*value).to_string()));
        elem.children.push(XMLNode::Element(child));
    }
    elem
}

/// Builds the SOAP body of a UPnP action invocation
///
/// # Arguments
///
/// * `service_urn` - service URN (e.g. "urn:schemas-upnp-org:service:ContentDirectory:1")
/// * `action` - action name (e.g. "Browse")
/// * `args` - input arguments, in declaration order
pub fn build_soap_request(
    service_urn: &str,
    action: &str,
    args: &[(&str, &str)],
) -> Result<String, xmltree::Error> {
    build_soap_envelope_with_body(action_element(format!("u:{}", action), service_urn, args))
}

/// Builds the SOAP response a device sends back for `action`
///
/// The control point never answers actions; this is used to stand in for a
/// device, e.g. in tests of response decoding.
pub fn build_soap_response(
    service_urn: &str,
    action: &str,
    values: Vec<(String, String)>,
) -> Result<String, xmltree::Error> {
    let borrowed: Vec<(&str, &str)> = values
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    build_soap_envelope_with_body(action_element(
        format!("u:{}Response", action),
        service_urn,
        &borrowed,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_browse_request() {
        let xml = build_soap_request(
            "urn:schemas-upnp-org:service:ContentDirectory:1",
            "Browse",
            &[
                ("ObjectID", "0"),
                ("BrowseFlag", "BrowseDirectChildren"),
                ("Filter", "*"),
            ],
        )
        .unwrap();

        assert!(xml.contains("<u:Browse"));
        assert!(xml.contains("<ObjectID>0</ObjectID>"));
        assert!(xml.contains("<BrowseFlag>BrowseDirectChildren</BrowseFlag>"));
        assert!(xml.contains("xmlns:u=\"urn:schemas-upnp-org:service:ContentDirectory:1\""));
    }

    #[test]
    fn test_request_escapes_arguments() {
        let xml = build_soap_request("urn:x", "Browse", &[("ObjectID", "a&b<c")]).unwrap();
        assert!(xml.contains("a&amp;b&lt;c"));
    }

    #[test]
    fn test_build_empty_response() {
        let xml = build_soap_response("urn:x", "X_GetFeatureList", Vec::new()).unwrap();
        assert!(xml.contains("X_GetFeatureListResponse"));
    }
}
