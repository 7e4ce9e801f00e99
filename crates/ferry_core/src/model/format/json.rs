use crate::error::{CoreError, Result};
use crate::model::ContentNode;

pub(super) fn to_string(node: &ContentNode) -> Result<String> {
    serde_json::to_string_pretty(node).map_err(|e| CoreError::SerializationError {
        data_type: "ContentNode".to_string(),
        cause: e,
    })
}

pub(super) fn from_str(text: &str) -> Result<ContentNode> {
    serde_json::from_str(text).map_err(|e| CoreError::SerializationError {
        data_type: "ContentNode".to_string(),
        cause: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContentProperty;

    #[test]
    fn test_json_shape() {
        let node = ContentNode::new("page", "site:page")
            .with_property(ContentProperty::string("site:title", "Home"))
            .with_child(ContentNode::new("body", "site:html"));
        let value: serde_json::Value = serde_json::from_str(&to_string(&node).unwrap()).unwrap();
        assert_eq!(value["primaryType"], "site:page");
        assert_eq!(value["properties"][0]["type"], "STRING");
        assert_eq!(value["properties"][0]["multiple"], false);
        assert_eq!(value["properties"][0]["values"][0], "Home");
        assert_eq!(value["nodes"][0]["name"], "body");
    }

    #[test]
    fn test_missing_collections_default_to_empty() {
        let node = from_str(r#"{"name": "leaf", "primaryType": "nt:unstructured"}"#).unwrap();
        assert!(node.properties().is_empty());
        assert!(node.children().is_empty());
    }

    #[test]
    fn test_bad_value_is_reported() {
        let err = from_str(
            r#"{"name": "n", "primaryType": "t",
                "properties": [{"name": "c", "type": "LONG", "multiple": false, "values": ["x"]}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::SerializationError { .. }));
    }
}
