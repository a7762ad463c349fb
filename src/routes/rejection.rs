use serde::Serialize;
use std::convert::Infallible;
use tracing::error;
use uuid::Uuid;
use warp::http::StatusCode;
use warp::{Rejection, Reply};

use crate::publisher::PublishError;
use crate::service::IngestError;
use crate::upload::UploadError;

#[derive(Debug)]
pub enum ApiError {
  EmptyFilename,
  UnsupportedType(String),
  TooLarge(u64),
  InvalidContent(String),
  BadRequest(String),
  NotFound(Uuid),
  Storage(String),
  Unavailable(String),
}
impl warp::reject::Reject for ApiError {}

impl ApiError {
  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::EmptyFilename | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::UnsupportedType(_) | ApiError::InvalidContent(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
      ApiError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
      ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
  }

  pub fn code(&self) -> &'static str {
    match self {
      ApiError::EmptyFilename => "empty_filename",
      ApiError::UnsupportedType(_) => "unsupported_type",
      ApiError::TooLarge(_) => "too_large",
      ApiError::InvalidContent(_) => "invalid_content",
      ApiError::BadRequest(_) => "bad_request",
      ApiError::NotFound(_) => "not_found",
      ApiError::Storage(_) => "storage_error",
      ApiError::Unavailable(_) => "queue_unavailable",
    }
  }

  fn message(&self) -> String {
    match self {
      ApiError::EmptyFilename => "empty file name".into(),
      ApiError::UnsupportedType(ext) => format!("unsupported file type '{ext}'"),
      ApiError::TooLarge(limit) => format!("file exceeds {limit} bytes"),
      ApiError::InvalidContent(_) => "file is not a valid image".into(),
      ApiError::BadRequest(msg) => msg.clone(),
      ApiError::NotFound(id) => format!("image {id} not found"),
      // internals are logged, not returned
      ApiError::Storage(_) => "storage failure".into(),
      ApiError::Unavailable(_) => "task queue unavailable".into(),
    }
  }
}

impl From<IngestError> for ApiError {
  fn from(e: IngestError) -> Self {
    match e {
      IngestError::Upload(UploadError::EmptyFilename) => ApiError::EmptyFilename,
      IngestError::Upload(UploadError::UnsupportedType(ext)) => ApiError::UnsupportedType(ext),
      IngestError::Upload(UploadError::TooLarge { limit }) => ApiError::TooLarge(limit),
      IngestError::Upload(UploadError::InvalidContent(reason)) => ApiError::InvalidContent(reason),
      IngestError::Upload(UploadError::Io(e)) => ApiError::Storage(e.to_string()),
      IngestError::Persistence(e) => ApiError::Storage(e.to_string()),
      IngestError::Publish(PublishError::Codec(e)) => ApiError::Storage(e.to_string()),
      IngestError::Publish(e) => ApiError::Unavailable(e.to_string()),
    }
  }
}

#[derive(Serialize)]
struct ErrorBody {
  error: &'static str,
  message: String,
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
  let (status, error, message) = if let Some(api) = err.find::<ApiError>() {
    if api.status().is_server_error() {
      error!(error = ?api, "request failed");
    }
    (api.status(), api.code(), api.message())
  } else if err.is_not_found() {
    (StatusCode::NOT_FOUND, "not_found", "no such route".to_string())
  } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
    (StatusCode::PAYLOAD_TOO_LARGE, "too_large", "request body too large".to_string())
  } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
    (StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", "method not allowed".to_string())
  } else {
    (StatusCode::BAD_REQUEST, "bad_request", format!("{err:?}"))
  };

  let body = warp::reply::json(&ErrorBody { error, message });
  Ok(warp::reply::with_status(body, status))
}
