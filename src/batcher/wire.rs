//! Batch wire format.
//!
//! ```json
//! {"batchId": "…", "actions": [{"action": {…}, "id": "a1", "parentId": "t1"}]}
//! {"results": [{"actionId": "a1", "success": true}, {"actionId": "a2", "success": false, "error": "…"}]}
//! ```

use serde::{Deserialize, Serialize};

use crate::actions::Action;

/// One transport call carrying several actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub batch_id: String,
    pub actions: Vec<BatchItem>,
}

/// One action inside a [`BatchRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub action: Action,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// Receiver's answer: one entry per action, matched by `action_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub results: Vec<BatchResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub action_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchResult {
    pub fn ok(action_id: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(action_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}
