//! The mutation decision for a single admission request.
use http::StatusCode;
use json_patch::{AddOperation, Patch, PatchOperation};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::policy::NamespacePolicy;
use crate::review::{failure, AdmissionRequest, AdmissionResponse};

/// Where the resource request is added. `~1` escapes the `/` in the resource name.
pub const RESOURCE_REQUEST_PATH: &str =
    "/spec/containers[0]/resources/requests/power-dev-plugin~1dev";
/// Units of the resource requested for each mutated pod
pub const REQUESTED_UNITS: &str = "1";

/// The patch applied to every pod in a selected namespace
pub fn pod_patch() -> Patch {
    Patch(vec![PatchOperation::Add(AddOperation {
        path: RESOURCE_REQUEST_PATH.to_owned(),
        value: Value::String(REQUESTED_UNITS.to_owned()),
    })])
}

/// Decides on one request. Objects in a namespace selected by `policy` are allowed with
/// [`pod_patch`] and everything else is allowed unchanged. Only the object's metadata is read;
/// a request without a JSON object under review is denied.
#[instrument(
    level = "debug",
    skip(policy, request),
    fields(
        uid = %request.uid,
        name = ?request.name,
        namespace = ?request.namespace,
        operation = ?request.operation,
        user = ?request.user_info.as_ref().map(|u| &u.username)
    )
)]
pub fn review(policy: &NamespacePolicy, request: &AdmissionRequest) -> AdmissionResponse {
    let metadata = match object_metadata(request) {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!(error = %e, "Could not read the metadata of the object under review");
            return AdmissionResponse::deny(
                &request.uid,
                failure(StatusCode::BAD_REQUEST, "BadRequest", e.to_string()),
            );
        }
    };

    // Pods created from a template often carry no namespace of their own
    let namespace = metadata
        .namespace
        .as_deref()
        .or(request.namespace.as_deref())
        .unwrap_or_default();
    let pod_name = metadata.name.as_deref().unwrap_or_default();

    if !policy.selects(namespace) {
        info!(%namespace, pod = %pod_name, allowed = true, "Skipping mutation due to policy check");
        return AdmissionResponse::allow(&request.uid);
    }

    match AdmissionResponse::allow_with_patch(&request.uid, &pod_patch()) {
        Ok(response) => {
            info!(%namespace, pod = %pod_name, allowed = true, path = RESOURCE_REQUEST_PATH, "Requesting device for pod");
            response
        }
        Err(e) => {
            warn!(error = %e, "Unable to encode patch");
            AdmissionResponse::deny(
                &request.uid,
                failure(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalError",
                    e.to_string(),
                ),
            )
        }
    }
}

/// Reads `metadata` from the object under review without decoding the rest of it
fn object_metadata(request: &AdmissionRequest) -> Result<ObjectMeta, String> {
    let fields = match &request.object {
        Some(Value::Object(fields)) => fields,
        Some(other) => return Err(format!("object under review is not a JSON object: {}", other)),
        None => return Err("request carries no object under review".to_owned()),
    };
    match fields.get("metadata") {
        None | Some(Value::Null) => Ok(ObjectMeta::default()),
        Some(metadata) => ObjectMeta::deserialize(metadata).map_err(|e| e.to_string()),
    }
}
