use warp::Filter;
use std::convert::Infallible;
use std::sync::Arc;
use crate::publisher::TaskChannel;
use crate::service::ImageService;
use crate::store::ImageStore;
pub mod images;
pub mod health;
pub mod rejection;

pub fn routes<S, C>(
  service: Arc<ImageService<S, C>>,
  max_form_bytes: u64,
) -> impl Filter<Extract = impl warp::Reply, Error = Infallible> + Clone
where
  S: ImageStore + 'static,
  C: TaskChannel + 'static,
{
  images::upload_route(service.clone(), max_form_bytes)
    .or(images::get_route(service.clone()))
    .or(health::health_route(service))
    .recover(rejection::handle_rejection)
}

/// Multipart envelope cap, looser than the per-file cap the writer enforces.
pub fn form_limit(max_upload_bytes: u64) -> u64 {
  max_upload_bytes.saturating_mul(2).saturating_add(64 * 1024)
}

fn with_service<S, C>(
  service: Arc<ImageService<S, C>>,
) -> impl Filter<Extract = (Arc<ImageService<S, C>>,), Error = Infallible> + Clone
where
  S: ImageStore + 'static,
  C: TaskChannel + 'static,
{
  warp::any().map(move || service.clone())
}

#[cfg(test)]
pub(crate) mod test_app {
  use super::*;
  use crate::publisher::TaskPublisher;
  use crate::publisher::recording::RecordingChannel;
  use crate::status::StatusMachine;
  use crate::storage::StorageLayout;
  use crate::store::memory::MemoryImageStore;
  use crate::task::DEFAULT_SIZES;
  use crate::upload::{MAX_UPLOAD_BYTES, UploadWriter};
  use tempfile::TempDir;
  use warp::http::Response;
  use bytes::Bytes;

  const BOUNDARY: &str = "imgpipe-test-boundary";

  pub fn multipart_body(field: &str, filename: &str, data: &[u8]) -> (String, Vec<u8>) {
    let mut body = format!(
      "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={BOUNDARY}"), body)
  }

  pub struct App {
    _dir: TempDir,
    pub store: MemoryImageStore,
    pub channel: RecordingChannel,
    pub service: Arc<TestService>,
    pub max_form_bytes: u64,
  }

  pub type TestService = ImageService<MemoryImageStore, RecordingChannel>;

  /// Owns everything it captures, so `warp::test` gets a `'static` filter.
  pub fn app_filter(
    service: Arc<TestService>,
    max_form_bytes: u64,
  ) -> impl Filter<Extract = impl warp::Reply, Error = Infallible> + Clone + 'static {
    routes(service, max_form_bytes)
  }

  impl App {
    pub fn new() -> Self {
      Self::with_limit(MAX_UPLOAD_BYTES)
    }

    pub fn with_limit(max_upload_bytes: u64) -> Self {
      let dir = TempDir::new().unwrap();
      let layout = StorageLayout::new(dir.path());
      let store = MemoryImageStore::new();
      let channel = RecordingChannel::default();
      let service = ImageService::new(
        UploadWriter::new(layout.clone(), max_upload_bytes),
        StatusMachine::new(store.clone()),
        TaskPublisher::new(channel.clone(), layout, DEFAULT_SIZES.to_vec()),
      );
      Self {
        _dir: dir,
        store,
        channel,
        service: Arc::new(service),
        max_form_bytes: form_limit(max_upload_bytes),
      }
    }

    pub async fn upload(&self, filename: &str, data: &[u8]) -> Response<Bytes> {
      let (content_type, body) = multipart_body("file", filename, data);
      let filter = app_filter(self.service.clone(), self.max_form_bytes);
      warp::test::request()
        .method("POST")
        .path("/v1/images/upload_image")
        .header("content-type", content_type)
        .body(body)
        .reply(&filter)
        .await
    }
  }
}
