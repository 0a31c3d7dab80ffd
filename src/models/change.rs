//! Shapes delivered by the remote change feed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Untyped document as the feed delivers it. Unknown fields are ignored by
/// the mapper.
pub type RawChangeDocument = Map<String, Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChange {
    pub kind: ChangeKind,
    pub document: RawChangeDocument,
}

impl DocumentChange {
    pub fn added(document: RawChangeDocument) -> Self {
        Self {
            kind: ChangeKind::Added,
            document,
        }
    }
}

/// One snapshot callback from the feed; changes are kept in delivery order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    pub document_changes: Vec<DocumentChange>,
}

impl ChangeNotification {
    pub fn new(document_changes: Vec<DocumentChange>) -> Self {
        Self { document_changes }
    }

    /// Documents of `Added` changes, in delivery order.
    pub fn added_documents(&self) -> impl Iterator<Item = &RawChangeDocument> {
        self.document_changes
            .iter()
            .filter(|change| change.kind == ChangeKind::Added)
            .map(|change| &change.document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> RawChangeDocument {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn added_documents_skips_modified_and_removed() {
        let notification = ChangeNotification::new(vec![
            DocumentChange::added(doc(json!({"sgv": "1"}))),
            DocumentChange {
                kind: ChangeKind::Modified,
                document: doc(json!({"sgv": "2"})),
            },
            DocumentChange {
                kind: ChangeKind::Removed,
                document: doc(json!({"sgv": "3"})),
            },
            DocumentChange::added(doc(json!({"sgv": "4"}))),
        ]);

        let sgvs: Vec<_> = notification
            .added_documents()
            .map(|d| d["sgv"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(sgvs, vec!["1", "4"]);
    }

    #[test]
    fn notification_deserializes_from_camel_case() {
        let notification: ChangeNotification = serde_json::from_value(json!({
            "documentChanges": [{"kind": "added", "document": {"date": 1}}]
        }))
        .unwrap();
        assert_eq!(notification.document_changes[0].kind, ChangeKind::Added);
    }
}
