//! SOAP envelope structures

use xmltree::Element;

/// Complete SOAP envelope
#[derive(Debug, Clone)]
pub struct SoapEnvelope {
    /// Optional SOAP header
    pub header: Option<SoapHeader>,

    /// Body holding the action response or a fault
    pub body: SoapBody,
}

/// SOAP header
#[derive(Debug, Clone)]
pub struct SoapHeader {
    pub content: Element,
}

/// SOAP body
#[derive(Debug, Clone)]
pub struct SoapBody {
    pub content: Element,
}
