use futures::TryStreamExt;
use std::io;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::{error, info};
use uuid::Uuid;
use warp::Filter;
use warp::multipart::{FormData, Part};

use super::rejection::ApiError;
use super::with_service;
use crate::publisher::TaskChannel;
use crate::service::ImageService;
use crate::store::ImageStore;

const FILE_FIELD: &str = "file";

pub fn upload_route<S, C>(
  service: Arc<ImageService<S, C>>,
  max_form_bytes: u64,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone
where
  S: ImageStore + 'static,
  C: TaskChannel + 'static,
{
  warp::path!("v1" / "images" / "upload_image")
    .and(warp::post())
    .and(warp::multipart::form().max_length(max_form_bytes))
    .and(with_service(service))
    .and_then(handle_upload)
}

pub fn get_route<S, C>(
  service: Arc<ImageService<S, C>>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone
where
  S: ImageStore + 'static,
  C: TaskChannel + 'static,
{
  warp::path!("v1" / "images" / Uuid)
    .and(warp::get())
    .and(with_service(service))
    .and_then(handle_get)
}

/// Adapts a multipart part into an `AsyncRead` so the body is never buffered whole.
fn part_reader(part: Part) -> impl AsyncRead + Send + Unpin {
  StreamReader::new(Box::pin(part.stream().map_err(io::Error::other)))
}

async fn handle_upload<S, C>(
  mut form: FormData,
  service: Arc<ImageService<S, C>>,
) -> Result<impl warp::Reply, warp::Rejection>
where
  S: ImageStore,
  C: TaskChannel,
{
  while let Some(part) = form.try_next().await.map_err(|e| {
    error!(error = %e, "malformed multipart body");
    warp::reject::custom(ApiError::BadRequest("malformed multipart body".into()))
  })? {
    if part.name() != FILE_FIELD {
      continue;
    }
    let filename = part.filename().unwrap_or_default().to_string();
    let receipt = service
      .upload(&filename, part_reader(part))
      .await
      .map_err(|e| warp::reject::custom(ApiError::from(e)))?;
    info!(image_id = %receipt.image_id, task_id = %receipt.task_id, filename = %filename, "image accepted");
    return Ok(warp::reply::json(&receipt));
  }

  Err(warp::reject::custom(ApiError::BadRequest(format!(
    "missing '{FILE_FIELD}' field"
  ))))
}

async fn handle_get<S, C>(image_id: Uuid, service: Arc<ImageService<S, C>>) -> Result<impl warp::Reply, warp::Rejection>
where
  S: ImageStore,
  C: TaskChannel,
{
  match service.get(image_id).await {
    Ok(Some(record)) => Ok(warp::reply::json(&record)),
    Ok(None) => Err(warp::reject::custom(ApiError::NotFound(image_id))),
    Err(e) => Err(warp::reject::custom(ApiError::Storage(e.to_string()))),
  }
}
