//! Snapshot encodings of a content tree.

mod json;
mod xml;

use serde::{Deserialize, Serialize};

use super::ContentNode;
use crate::error::Result;

/// Structured text format of a snapshot file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    #[default]
    Json,
    Xml,
}

impl SnapshotFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SnapshotFormat::Json => "json",
            SnapshotFormat::Xml => "xml",
        }
    }

    /// Format implied by a file extension, if it is one we write.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "json" => Some(SnapshotFormat::Json),
            "xml" => Some(SnapshotFormat::Xml),
            _ => None,
        }
    }

    pub fn serialize(&self, node: &ContentNode) -> Result<String> {
        match self {
            SnapshotFormat::Json => json::to_string(node),
            SnapshotFormat::Xml => xml::to_string(node),
        }
    }

    pub fn deserialize(&self, text: &str) -> Result<ContentNode> {
        match self {
            SnapshotFormat::Json => json::from_str(text),
            SnapshotFormat::Xml => xml::from_str(text),
        }
    }
}

impl std::str::FromStr for SnapshotFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_extension(s).ok_or_else(|| format!("unknown snapshot format '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{BinaryValue, ContentProperty, ContentValue, PropertyType};

    fn rich_tree() -> ContentNode {
        let date = DateTime::parse_from_rfc3339("2023-11-05T08:00:00.123+01:00").unwrap();
        ContentNode::new("launch & <news>", "site:article")
            .with_property(ContentProperty::string("site:title", "  padded \"quoted\" title  "))
            .with_property(ContentProperty::string("site:body", "line one\nline two\n\ttabbed"))
            .with_property(ContentProperty::string("site:empty", ""))
            .with_property(ContentProperty::empty("site:ratings", PropertyType::Long))
            .with_property(ContentProperty::empty("site:published", PropertyType::Date))
            .with_property(
                ContentProperty::new(
                    "site:scores",
                    PropertyType::Double,
                    true,
                    vec![ContentValue::Double(0.1), ContentValue::Double(-2.5e-8)],
                )
                .unwrap(),
            )
            .with_property(ContentProperty::single("site:count", PropertyType::Long, 42_i64).unwrap())
            .with_property(ContentProperty::single("site:visible", PropertyType::Boolean, true).unwrap())
            .with_property(ContentProperty::single("site:date", PropertyType::Date, ContentValue::Date(date)).unwrap())
            .with_property(ContentProperty::strings("site:tags", ["a", "", "c & d"]))
            .with_child(
                ContentNode::new("image", "site:imagelink")
                    .with_property(
                        ContentProperty::single("ferry:docbase", PropertyType::Reference, "/content/assets/logo")
                            .unwrap(),
                    )
                    .with_property(
                        ContentProperty::single(
                            "site:data",
                            PropertyType::Binary,
                            BinaryValue::Inline(vec![0, 159, 146, 150, 255]),
                        )
                        .unwrap(),
                    )
                    .with_property(
                        ContentProperty::single(
                            "site:large",
                            PropertyType::Binary,
                            BinaryValue::External {
                                locator: "_attachments/content/x/site_large-0.bin".to_string(),
                            },
                        )
                        .unwrap(),
                    ),
            )
            .with_child(ContentNode::new("image", "site:imagelink"))
            .with_child(ContentNode::new("empty-leaf", "nt:unstructured"))
    }

    #[test]
    fn test_json_roundtrip_is_lossless() {
        let tree = rich_tree();
        let text = SnapshotFormat::Json.serialize(&tree).unwrap();
        assert_eq!(SnapshotFormat::Json.deserialize(&text).unwrap(), tree);
    }

    #[test]
    fn test_xml_roundtrip_is_lossless() {
        let tree = rich_tree();
        let text = SnapshotFormat::Xml.serialize(&tree).unwrap();
        assert_eq!(SnapshotFormat::Xml.deserialize(&text).unwrap(), tree);
    }

    #[test]
    fn test_empty_multi_value_keeps_type_in_both_formats() {
        let tree = ContentNode::new("n", "t")
            .with_property(ContentProperty::empty("dates", PropertyType::Date))
            .with_property(ContentProperty::empty("refs", PropertyType::WeakReference));
        for format in [SnapshotFormat::Json, SnapshotFormat::Xml] {
            let back = format.deserialize(&format.serialize(&tree).unwrap()).unwrap();
            assert_eq!(
                back.property("dates").unwrap().property_type(),
                PropertyType::Date
            );
            assert_eq!(
                back.property("refs").unwrap().property_type(),
                PropertyType::WeakReference
            );
        }
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(SnapshotFormat::from_extension("XML"), Some(SnapshotFormat::Xml));
        assert_eq!(SnapshotFormat::from_extension("yaml"), None);
        assert_eq!("json".parse::<SnapshotFormat>().unwrap(), SnapshotFormat::Json);
    }
}
