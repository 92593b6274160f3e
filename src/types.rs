use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct StreamResponse {
    pub stream_id: String,
}

/// Raw inbound fields, before the validation gate has looked at them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TweakForm {
    #[serde(default)]
    pub resume: String,
    #[serde(default)]
    pub job_description: String,
}

/// A request that passed validation and may be handed to a producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub resume: String,
    pub job_description: String,
}

/// Progress markers pushed to the client as the `step` signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Step {
    #[default]
    Idle = 0,
    Dispatched = 1,
    Opened = 2,
    Receiving = 3,
    Complete = 4,
}

impl From<Step> for u8 {
    fn from(step: Step) -> Self {
        step as u8
    }
}

/// A partial update of the client-side signal store.
///
/// Only the keys that are `Some` end up on the wire, so a patch can carry a
/// single changed signal or the whole state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loading: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<u8>,
}

impl SignalPatch {
    /// The full reset pushed when a stream opens.
    pub fn initial() -> Self {
        Self {
            loading: Some(true),
            result: Some(String::new()),
            error: Some(String::new()),
            step: Some(Step::Idle.into()),
        }
    }

    pub fn step(step: Step) -> Self {
        Self {
            step: Some(step.into()),
            ..Default::default()
        }
    }

    pub fn result(result: impl Into<String>) -> Self {
        Self {
            result: Some(result.into()),
            ..Default::default()
        }
    }

    pub fn completed(result: impl Into<String>) -> Self {
        Self {
            loading: Some(false),
            result: Some(result.into()),
            step: Some(Step::Complete.into()),
            ..Default::default()
        }
    }

    // Failure resets the step so the client shows no usable progress.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            loading: Some(false),
            error: Some(message.into()),
            step: Some(Step::Idle.into()),
            ..Default::default()
        }
    }
}

/// Client-observed state: what you get by merging every pushed patch in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    pub loading: bool,
    pub result: String,
    pub error: String,
    pub step: u8,
}

impl ProgressState {
    pub fn apply(&mut self, patch: &SignalPatch) {
        if let Some(loading) = patch.loading {
            self.loading = loading;
        }
        if let Some(result) = &patch.result {
            self.result.clone_from(result);
        }
        if let Some(error) = &patch.error {
            self.error.clone_from(error);
        }
        if let Some(step) = patch.step {
            self.step = step;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_serializes_only_present_keys() {
        let json = serde_json::to_string(&SignalPatch::step(Step::Opened)).unwrap();
        assert_eq!(json, r#"{"step":2}"#);

        let json = serde_json::to_string(&SignalPatch::initial()).unwrap();
        assert_eq!(json, r#"{"loading":true,"result":"","error":"","step":0}"#);
    }

    #[test]
    fn test_failed_patch_has_no_result() {
        let patch = SignalPatch::failed("boom");
        assert!(patch.result.is_none());
        assert_eq!(patch.step, Some(0));
        assert_eq!(patch.loading, Some(false));
    }

    #[test]
    fn test_state_merges_patches_in_order() {
        let mut state = ProgressState::default();
        state.apply(&SignalPatch::initial());
        state.apply(&SignalPatch::step(Step::Dispatched));
        state.apply(&SignalPatch::result("partial"));
        assert!(state.loading);
        assert_eq!(state.step, 1);
        assert_eq!(state.result, "partial");

        state.apply(&SignalPatch::completed("done"));
        assert!(!state.loading);
        assert_eq!(state.step, 4);
        assert_eq!(state.result, "done");
        assert_eq!(state.error, "");
    }
}
