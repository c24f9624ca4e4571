//! # Action: a single named state-mutation request.
//!
//! Actions are immutable once created. The builder-style `with_*` methods
//! consume and return the action, so they are only used while assembling it.
//!
//! ```rust
//! use bridgevisor::Action;
//! use serde_json::json;
//!
//! let a = Action::new("COUNTER:SET")
//!     .with_payload(json!(4))
//!     .with_keys(["counter"]);
//! assert_eq!(a.action_type, "COUNTER:SET");
//! assert_eq!(a.keys.as_deref(), Some(&["counter".to_string()][..]));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of an observer (window / view) on the far side of the transport.
pub type ObserverId = u32;

/// Application state as seen by the bridge.
pub type State = Value;

/// A single state-mutation request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    /// Action type, e.g. `COUNTER:SET`.
    #[serde(rename = "type")]
    pub action_type: String,

    /// Optional payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// Unique id used to correlate results and acknowledgements.
    pub id: String,

    /// Thunk this action belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thunk_parent_id: Option<String>,

    /// Observer that submitted the action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_observer_id: Option<ObserverId>,

    /// State keys the action touches (`None` = unknown / whole state).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,

    /// Skips lock and ordering constraints (administrative use).
    #[serde(default)]
    pub bypass_lock: bool,

    /// Skips observer access checks.
    #[serde(default)]
    pub bypass_access_control: bool,
}

impl Action {
    /// Creates an action with a fresh UUID id.
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            payload: None,
            id: uuid::Uuid::new_v4().to_string(),
            thunk_parent_id: None,
            source_observer_id: None,
            keys: None,
            bypass_lock: false,
            bypass_access_control: false,
        }
    }

    /// Replaces the generated id.
    #[inline]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Attaches a payload.
    #[inline]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Marks the action as part of a thunk.
    #[inline]
    pub fn with_thunk(mut self, thunk_id: impl Into<String>) -> Self {
        self.thunk_parent_id = Some(thunk_id.into());
        self
    }

    /// Records the submitting observer.
    #[inline]
    pub fn with_source(mut self, observer: ObserverId) -> Self {
        self.source_observer_id = Some(observer);
        self
    }

    /// Declares the state keys the action touches.
    #[inline]
    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Exempts the action from lock and ordering constraints.
    #[inline]
    pub fn bypassing_lock(mut self) -> Self {
        self.bypass_lock = true;
        self
    }

    /// Exempts the action from observer access checks.
    #[inline]
    pub fn bypassing_access_control(mut self) -> Self {
        self.bypass_access_control = true;
        self
    }
}
