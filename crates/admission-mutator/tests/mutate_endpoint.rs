use std::sync::Arc;

use admission_mutator::{server, NamespacePolicy};
use serde_json::{json, Value};

const UID: &str = "705ab4f5-6393-11e8-b7cc-42010a800002";

fn routes() -> impl warp::Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let policy = NamespacePolicy::from_yaml("namespaces:\n  storage:\n    - fio\n").unwrap();
    server::routes(Arc::new(policy))
}

fn review_for(namespace: &str) -> Value {
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": UID,
            "kind": { "group": "", "version": "v1", "kind": "Pod" },
            "namespace": namespace,
            "operation": "CREATE",
            "userInfo": { "username": "system:serviceaccount:kube-system:replicaset-controller" },
            "object": {
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": { "name": "fio", "namespace": namespace },
                "spec": { "containers": [{ "name": "fio", "image": "fio:latest" }] }
            }
        }
    })
}

async fn post(content_type: Option<&str>, body: Vec<u8>) -> (u16, Value) {
    let mut request = warp::test::request().method("POST").path("/mutate");
    if let Some(ct) = content_type {
        request = request.header("content-type", ct);
    }
    let response = request.body(body).reply(&routes()).await;
    let value = serde_json::from_slice(response.body()).unwrap_or(Value::Null);
    (response.status().as_u16(), value)
}

#[tokio::test]
async fn wrong_content_type_is_415() {
    let body = serde_json::to_vec(&review_for("storage")).unwrap();
    let (status, review) = post(Some("text/plain"), body).await;
    assert_eq!(status, 415);
    assert_eq!(review["response"]["allowed"], json!(false));
    assert_eq!(review["response"]["status"]["code"], json!(415));
}

#[tokio::test]
async fn missing_content_type_is_415() {
    let body = serde_json::to_vec(&review_for("storage")).unwrap();
    let (status, _) = post(None, body).await;
    assert_eq!(status, 415);
}

#[tokio::test]
async fn empty_body_is_400() {
    let (status, review) = post(Some("application/json"), Vec::new()).await;
    assert_eq!(status, 400);
    assert_eq!(review["response"]["status"]["reason"], json!("BadRequest"));
}

#[tokio::test]
async fn undecodable_review_is_400_with_envelope() {
    let (status, review) = post(Some("application/json"), b"{not json".to_vec()).await;
    assert_eq!(status, 400);
    assert_eq!(review["kind"], json!("AdmissionReview"));
    assert_eq!(review["response"]["status"]["code"], json!(400));
    assert!(review["response"].get("patch").is_none());
}

#[tokio::test]
async fn unselected_namespace_is_allowed_unchanged() {
    let body = serde_json::to_vec(&review_for("default")).unwrap();
    let (status, review) = post(Some("application/json; charset=utf-8"), body).await;
    assert_eq!(status, 200);
    assert_eq!(review["apiVersion"], json!("admission.k8s.io/v1"));
    assert_eq!(review["kind"], json!("AdmissionReview"));
    assert_eq!(review["response"]["uid"], json!(UID));
    assert_eq!(review["response"]["allowed"], json!(true));
    assert!(review["response"].get("patch").is_none());
    assert!(review["response"].get("patchType").is_none());
}

#[tokio::test]
async fn configmap_in_unselected_namespace_is_allowed() {
    let mut body = review_for("default");
    body["request"]["kind"] = json!({ "group": "", "version": "v1", "kind": "ConfigMap" });
    body["request"]["object"] = json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": { "name": "settings", "namespace": "default" },
        "data": { "mode": "fast" }
    });
    let (status, review) = post(Some("application/json"), serde_json::to_vec(&body).unwrap()).await;
    assert_eq!(status, 200);
    assert_eq!(review["response"]["allowed"], json!(true));
    assert!(review["response"].get("status").is_none());
    assert!(review["response"].get("patch").is_none());
}

#[tokio::test]
async fn selected_namespace_gets_resource_request() {
    let body = serde_json::to_vec(&review_for("storage")).unwrap();
    let (status, review) = post(Some("application/json"), body).await;
    assert_eq!(status, 200);
    assert_eq!(review["response"]["uid"], json!(UID));
    assert_eq!(review["response"]["allowed"], json!(true));
    assert_eq!(review["response"]["patchType"], json!("JSONPatch"));

    let encoded = review["response"]["patch"].as_str().unwrap();
    let patch: Value = serde_json::from_slice(&base64::decode(encoded).unwrap()).unwrap();
    let ops = patch.as_array().unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0]["op"], json!("add"));
    assert_eq!(
        ops[0]["path"],
        json!("/spec/containers[0]/resources/requests/power-dev-plugin~1dev")
    );
    assert_eq!(ops[0]["value"], json!("1"));
}

#[tokio::test]
async fn only_post_mutate_is_served() {
    let response = warp::test::request()
        .method("GET")
        .path("/mutate")
        .reply(&routes())
        .await;
    assert_eq!(response.status().as_u16(), 405);

    let response = warp::test::request()
        .method("POST")
        .path("/validate")
        .header("content-type", "application/json")
        .body("{}")
        .reply(&routes())
        .await;
    assert_eq!(response.status().as_u16(), 404);
}
