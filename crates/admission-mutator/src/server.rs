//! The HTTP(S) server answering admission reviews.
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Response, StatusCode};
use hyper::Body;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use warp::Filter;

use crate::config::Config;
use crate::mutate;
use crate::policy::NamespacePolicy;
use crate::review::{failure, AdmissionResponse, AdmissionReviewRequest, AdmissionReviewResponse};
use crate::MalformedRequest;

const JSON: &str = "application/json";

/// Serves the webhook until `shutdown` resolves, then waits for open requests to finish.
pub async fn start<F>(config: &Config, policy: NamespacePolicy, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let routes = routes(Arc::new(policy));
    let addr = config.socket_addr();

    match config.tls_files() {
        Some((cert, key)) => {
            // warp panics on unreadable TLS files, so check them up front
            for file in [cert, key] {
                std::fs::metadata(file)
                    .with_context(|| format!("unable to read TLS file {}", file.display()))?;
            }
            info!(%addr, "Serving admission webhook over TLS");
            let (_, server) = warp::serve(routes)
                .tls()
                .cert_path(cert)
                .key_path(key)
                .bind_with_graceful_shutdown(addr, shutdown);
            server.await;
        }
        None => {
            let (bound, server) = warp::serve(routes)
                .try_bind_with_graceful_shutdown(addr, shutdown)
                .with_context(|| format!("unable to listen on {}", addr))?;
            info!(addr = %bound, "Serving admission webhook");
            server.await;
        }
    }
    info!("Admission webhook shut down");
    Ok(())
}

/// The webhook routes: `POST /mutate` and nothing else
pub fn routes(
    policy: Arc<NamespacePolicy>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::post()
        .and(warp::path("mutate"))
        .and(warp::path::end())
        .and(warp::header::optional::<String>("content-type"))
        .and(warp::body::bytes())
        .and_then(move |content_type: Option<String>, body: Bytes| {
            let policy = Arc::clone(&policy);
            async move { Ok::<_, Infallible>(post_mutate(&policy, content_type, body)) }
        })
}

/// Answers one review. Malformed requests get an error status and an envelope describing it.
fn post_mutate(
    policy: &NamespacePolicy,
    content_type: Option<String>,
    body: Bytes,
) -> Response<Body> {
    match decode(content_type.as_deref(), &body) {
        Ok(review) => {
            let response = mutate::review(policy, &review.request);
            debug!(uid = %response.uid, allowed = response.allowed, "Ready to write response");
            json_response(
                StatusCode::OK,
                &AdmissionReviewResponse {
                    api_version: review.api_version,
                    kind: review.kind,
                    response,
                },
            )
        }
        Err(e) => {
            warn!(error = %e, "Rejecting malformed admission request");
            let status = failure(e.status_code(), e.reason(), e.to_string());
            json_response(
                e.status_code(),
                &AdmissionReviewResponse::new(AdmissionResponse::deny("", status)),
            )
        }
    }
}

/// Checks the content type and body and decodes the review envelope
pub fn decode(
    content_type: Option<&str>,
    body: &[u8],
) -> Result<AdmissionReviewRequest, MalformedRequest> {
    if !is_json(content_type) {
        return Err(MalformedRequest::UnsupportedMediaType(
            content_type.map(str::to_owned),
        ));
    }
    if body.is_empty() {
        return Err(MalformedRequest::EmptyBody);
    }
    serde_json::from_slice(body).map_err(MalformedRequest::UndecodableReview)
}

/// Whether the media type is JSON, ignoring parameters such as `charset`
fn is_json(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(|essence| essence.trim().eq_ignore_ascii_case(JSON))
        .unwrap_or(false)
}

fn json_response<T: Serialize>(code: StatusCode, body: &T) -> Response<Body> {
    match serde_json::to_vec(body) {
        Ok(raw) => {
            let mut response = Response::new(Body::from(raw));
            *response.status_mut() = code;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(JSON));
            response
        }
        Err(e) => {
            error!(error = %e, "Can't encode response");
            let mut response = Response::new(Body::from(format!("could not encode response: {}", e)));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}

/// Resolves on the first SIGINT or SIGTERM. The listeners are registered before this returns.
pub fn shutdown_signal() -> anyhow::Result<impl Future<Output = ()> + Send + 'static> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt()).context("unable to listen for SIGINT")?;
    let mut terminate = signal(SignalKind::terminate()).context("unable to listen for SIGTERM")?;
    Ok(async move {
        let caught = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        };
        warn!(signal = caught, "Caught shutdown signal, shutting down");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_parameters_are_tolerated() {
        assert!(is_json(Some("application/json")));
        assert!(is_json(Some("application/json; charset=utf-8")));
        assert!(is_json(Some("Application/JSON")));
        assert!(!is_json(Some("text/plain")));
        assert!(!is_json(Some("application/jsonp")));
        assert!(!is_json(None));
    }

    #[test]
    fn decode_checks_media_type_before_body() {
        assert!(matches!(
            decode(Some("text/plain"), b""),
            Err(MalformedRequest::UnsupportedMediaType(Some(_)))
        ));
        assert!(matches!(
            decode(Some(JSON), b""),
            Err(MalformedRequest::EmptyBody)
        ));
        assert!(matches!(
            decode(Some(JSON), b"{\"request\": 5}"),
            Err(MalformedRequest::UndecodableReview(_))
        ));
    }
}
