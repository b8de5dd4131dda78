//! Vendor feature list returned by `X_GetFeatureList`
//!
//! ```xml
//! <Features xmlns="urn:schemas-upnp-org:av:avs">
//!   <Feature name="samsung.com_BASICVIEW" version="1">
//!     <container id="A" type="object.item.audioItem"/>
//!     <container id="V" type="object.item.videoItem"/>
//!   </Feature>
//! </Features>
//! ```

use serde::{Deserialize, Serialize};

use crate::{Result, VIDEO_ITEM_CLASS};

/// Suffix of the feature listing flat per-media-type views
pub const BASIC_VIEW_FEATURE: &str = "BASICVIEW";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename = "Features")]
pub struct FeatureList {
    #[serde(rename = "Feature", default)]
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "@name")]
    pub name: String,

    #[serde(rename = "@version", skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(rename = "container", default)]
    pub containers: Vec<FeatureContainer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureContainer {
    #[serde(rename = "@id")]
    pub id: String,

    #[serde(rename = "@type", default)]
    pub class: String,
}

impl FeatureList {
    pub fn parse(input: &str) -> Result<Self> {
        Ok(quick_xml::de::from_str(input)?)
    }

    /// Id of the container holding every video in the basic view
    pub fn video_root(&self) -> Option<&str> {
        self.features
            .iter()
            .filter(|f| f.name.ends_with(BASIC_VIEW_FEATURE))
            .flat_map(|f| f.containers.iter())
            .find(|c| c.class.starts_with(VIDEO_ITEM_CLASS))
            .map(|c| c.id.as_str())
            .filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_view_video_root() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<Features xmlns="urn:schemas-upnp-org:av:avs"
          xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <Feature name="samsung.com_BASICVIEW" version="1">
    <container id="A" type="object.item.audioItem"/>
    <container id="V" type="object.item.videoItem"/>
    <container id="I" type="object.item.imageItem"/>
  </Feature>
</Features>"#;

        let features = FeatureList::parse(xml).unwrap();
        assert_eq!(features.features.len(), 1);
        assert_eq!(features.video_root(), Some("V"));
    }

    #[test]
    fn test_other_features_are_ignored() {
        let xml = r#"<Features xmlns="urn:schemas-upnp-org:av:avs">
  <Feature name="samsung.com_DLNA_PLAYLIST" version="1">
    <container id="P" type="object.item.videoItem"/>
  </Feature>
</Features>"#;

        let features = FeatureList::parse(xml).unwrap();
        assert_eq!(features.video_root(), None);
    }
}
