//! Interchange JSON used to boot an editor.

use serde::{Deserialize, Serialize};

use crate::document::Document;

fn default_true() -> bool {
    true
}

/// Initial editor state: the document plus host flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInit {
    /// When false, every mutating command is rejected.
    #[serde(default = "default_true")]
    pub editable: bool,
    #[serde(default)]
    pub debug: bool,
    pub document: Document,
}

impl DocumentInit {
    pub fn new(document: Document) -> Self {
        Self {
            editable: true,
            debug: false,
            document,
        }
    }

    pub fn read_only(document: Document) -> Self {
        Self {
            editable: false,
            ..Self::new(document)
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Default for DocumentInit {
    fn default() -> Self {
        Self::new(Document::with_default_scene())
    }
}
