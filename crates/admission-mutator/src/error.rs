use http::StatusCode;
use thiserror::Error;

/// A request that never reached the mutation decision.
#[derive(Error, Debug)]
pub enum MalformedRequest {
    /// The request body is not declared as JSON.
    #[error("invalid Content-Type {0:?}, expect `application/json`")]
    UnsupportedMediaType(Option<String>),
    /// The request carried no body.
    #[error("empty body")]
    EmptyBody,
    /// The body is not an `AdmissionReview`.
    #[error("unable to decode AdmissionReview: {0}")]
    UndecodableReview(#[source] serde_json::Error),
}

impl MalformedRequest {
    /// The HTTP status answered for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            MalformedRequest::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            MalformedRequest::EmptyBody | MalformedRequest::UndecodableReview(_) => {
                StatusCode::BAD_REQUEST
            }
        }
    }

    /// Machine readable reason, in the vocabulary of the Kubernetes `Status` type
    pub fn reason(&self) -> &'static str {
        match self {
            MalformedRequest::UnsupportedMediaType(_) => "UnsupportedMediaType",
            MalformedRequest::EmptyBody | MalformedRequest::UndecodableReview(_) => "BadRequest",
        }
    }
}
