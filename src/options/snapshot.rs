//! Serializable view of every schema key for settings UIs.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    /// Effective value per schema key.
    pub values: BTreeMap<String, Value>,
    pub metadata: BTreeMap<String, SnapshotMeta>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotMeta {
    /// A stored value differs from the default. List values are compared as
    /// sets, as when saving, so a reordered default is not an override.
    pub is_overridden: bool,
    /// Section group id; `None` for settings outside any tab.
    pub section_group: Option<String>,
}

impl Snapshot {
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_shape() {
        let mut snapshot = Snapshot::default();
        snapshot.values.insert("steps".into(), json!(20));
        snapshot.metadata.insert(
            "steps".into(),
            SnapshotMeta {
                is_overridden: false,
                section_group: Some("sd".into()),
            },
        );

        assert_eq!(
            snapshot.to_json(),
            json!({
                "values": {"steps": 20},
                "metadata": {"steps": {"is_overridden": false, "section_group": "sd"}}
            })
        );
    }
}
