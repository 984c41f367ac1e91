// src/monitors/note.rs
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A timeline note as delivered on the `note` event.
///
/// Only the fields the pipeline looks at are typed; everything else is kept
/// in `extra` so handlers can still reach it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user: Option<NoteUser>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteUser {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl Note {
    /// Media-only and empty notes have no text.
    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|text| !text.is_empty())
    }

    pub fn author_id(&self) -> Option<&str> {
        self.user_id
            .as_deref()
            .or_else(|| self.user.as_ref().map(|user| user.id.as_str()))
    }

    pub fn author_username(&self) -> &str {
        self.user
            .as_ref()
            .and_then(|user| user.username.as_deref())
            .unwrap_or("unknown")
    }
}
