//! The parts of the `admission.k8s.io/v1` `AdmissionReview` API the webhook reads and writes.
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use serde::{Deserialize, Serialize};

/// API version of the reviews answered when the request did not say
pub const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";
/// Kind of an admission review envelope
pub const ADMISSION_REVIEW_KIND: &str = "AdmissionReview";
/// The only patch type the API server accepts
pub const JSON_PATCH: &str = "JSONPatch";

/// Group, version and kind of the object under review
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GroupVersionKind {
    /// API group, empty for the core group
    pub group: String,
    /// API version
    pub version: String,
    /// Object kind
    pub kind: String,
}

/// The user whose request is being reviewed
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct UserInfo {
    /// User name
    pub username: String,
    /// Groups the user belongs to
    pub groups: Vec<String>,
}

/// AdmissionRequest describes the admission attributes of one request.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    /// Identifier for the individual request/response, echoed in the response
    pub uid: String,
    /// Type of the object under review
    #[serde(default)]
    pub kind: Option<GroupVersionKind>,
    /// Name of the object, absent for objects named by the server on creation
    #[serde(default)]
    pub name: Option<String>,
    /// Namespace the request targets
    #[serde(default)]
    pub namespace: Option<String>,
    /// CREATE, UPDATE, DELETE or CONNECT
    #[serde(default)]
    pub operation: Option<String>,
    /// Requesting user
    #[serde(default)]
    pub user_info: Option<UserInfo>,
    /// The object from the incoming request, undecoded
    #[serde(default)]
    pub object: Option<serde_json::Value>,
    /// Whether the request is a dry run
    #[serde(default)]
    pub dry_run: Option<bool>,
}

/// The incoming review envelope
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReviewRequest {
    /// API version of the review, echoed in the response
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Kind of the review, echoed in the response
    #[serde(default = "default_kind")]
    pub kind: String,
    /// The request under review
    pub request: AdmissionRequest,
}

/// AdmissionResponse describes an admission response.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    /// Copied from the corresponding request
    pub uid: String,
    /// Whether the request is permitted
    pub allowed: bool,
    /// Why the request was denied or could not be reviewed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// Base64 encoded JSON patch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    /// Always [`JSON_PATCH`] when `patch` is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<String>,
}

impl AdmissionResponse {
    /// Allows the request unchanged
    pub fn allow(uid: &str) -> Self {
        AdmissionResponse {
            uid: uid.to_owned(),
            allowed: true,
            ..Default::default()
        }
    }

    /// Rejects the request with `status`
    pub fn deny(uid: &str, status: Status) -> Self {
        AdmissionResponse {
            uid: uid.to_owned(),
            allowed: false,
            status: Some(status),
            ..Default::default()
        }
    }

    /// Allows the request with `patch` applied
    pub fn allow_with_patch(uid: &str, patch: &json_patch::Patch) -> serde_json::Result<Self> {
        let raw = serde_json::to_vec(patch)?;
        Ok(AdmissionResponse {
            patch: Some(base64::encode(raw)),
            patch_type: Some(JSON_PATCH.to_owned()),
            ..Self::allow(uid)
        })
    }
}

/// The outgoing review envelope
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReviewResponse {
    /// API version, echoed from the request
    pub api_version: String,
    /// Kind, echoed from the request
    pub kind: String,
    /// The decision
    pub response: AdmissionResponse,
}

impl AdmissionReviewResponse {
    /// Wraps `response` in an envelope of the default API version
    pub fn new(response: AdmissionResponse) -> Self {
        AdmissionReviewResponse {
            api_version: default_api_version(),
            kind: default_kind(),
            response,
        }
    }
}

/// Builds a failure `Status` with an HTTP `code`, a machine readable `reason` and a message
pub fn failure(code: http::StatusCode, reason: &str, message: String) -> Status {
    Status {
        code: Some(i32::from(code.as_u16())),
        message: Some(message),
        reason: Some(reason.to_owned()),
        status: Some("Failure".to_owned()),
        ..Default::default()
    }
}

fn default_api_version() -> String {
    ADMISSION_API_VERSION.to_owned()
}

fn default_kind() -> String {
    ADMISSION_REVIEW_KIND.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_needs_a_uid() {
        let err = serde_json::from_value::<AdmissionReviewRequest>(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": { "namespace": "default" }
        }));
        assert!(err.is_err());
    }

    #[test]
    fn envelope_defaults() {
        let review: AdmissionReviewRequest = serde_json::from_value(json!({
            "request": { "uid": "abc" }
        }))
        .unwrap();
        assert_eq!(review.api_version, ADMISSION_API_VERSION);
        assert_eq!(review.kind, ADMISSION_REVIEW_KIND);
        assert!(review.request.object.is_none());
    }

    #[test]
    fn allow_omits_optional_fields() {
        let value = serde_json::to_value(AdmissionResponse::allow("abc")).unwrap();
        assert_eq!(value, json!({ "uid": "abc", "allowed": true }));
    }

    #[test]
    fn patch_is_base64_encoded() {
        let patch: json_patch::Patch =
            serde_json::from_value(json!([{ "op": "add", "path": "/a", "value": "1" }])).unwrap();
        let response = AdmissionResponse::allow_with_patch("abc", &patch).unwrap();
        assert_eq!(response.patch_type.as_deref(), Some(JSON_PATCH));
        let decoded = base64::decode(response.patch.unwrap()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(value, json!([{ "op": "add", "path": "/a", "value": "1" }]));
    }

    #[test]
    fn failure_status_carries_code_and_reason() {
        let status = failure(http::StatusCode::BAD_REQUEST, "BadRequest", "nope".to_owned());
        assert_eq!(status.code, Some(400));
        assert_eq!(status.reason.as_deref(), Some("BadRequest"));
        assert_eq!(status.status.as_deref(), Some("Failure"));
    }
}
