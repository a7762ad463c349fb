use thiserror::Error;
use tokio::io::AsyncRead;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{ImageRecord, ImageStatus, UploadReceipt};
use crate::publisher::{PublishError, TaskChannel, TaskPublisher};
use crate::status::{StatusMachine, TransitionError};
use crate::store::ImageStore;
use crate::upload::{UploadError, UploadWriter};

#[derive(Debug, Error)]
pub enum IngestError {
  #[error(transparent)]
  Upload(#[from] UploadError),
  #[error("failed to record image: {0}")]
  Persistence(#[from] TransitionError),
  #[error(transparent)]
  Publish(#[from] PublishError),
}

/// Upload path: store the original, create the `NEW` record, queue the task.
pub struct ImageService<S, C> {
  writer: UploadWriter,
  status: StatusMachine<S>,
  publisher: TaskPublisher<C>,
}

impl<S: ImageStore, C: TaskChannel> ImageService<S, C> {
  pub fn new(writer: UploadWriter, status: StatusMachine<S>, publisher: TaskPublisher<C>) -> Self {
    Self {
      writer,
      status,
      publisher,
    }
  }

  pub fn store(&self) -> &S {
    self.status.store()
  }

  pub fn channel(&self) -> &C {
    self.publisher.channel()
  }

  /// A publish failure leaves the record in `NEW` with no task; the error is
  /// returned so the caller can report the channel as unavailable.
  pub async fn upload<R>(&self, filename: &str, source: R) -> Result<UploadReceipt, IngestError>
  where
    R: AsyncRead + Unpin + Send,
  {
    let stored = self.writer.store(filename, source).await?;
    let relative = self.writer.layout().to_relative(&stored.path);

    if let Err(e) = self.status.create(stored.image_id, &relative).await {
      error!(image_id = %stored.image_id, error = %e, "failed to record upload, removing original");
      if let Err(rm) = tokio::fs::remove_file(&stored.path).await {
        warn!(path = %stored.path.display(), error = %rm, "original left orphaned");
      }
      return Err(e.into());
    }

    let task_id = self
      .publisher
      .publish(stored.image_id, &stored.path)
      .await
      .inspect_err(|e| error!(image_id = %stored.image_id, error = %e, "record left in NEW without a task"))?;

    info!(image_id = %stored.image_id, task_id = %task_id, "upload accepted");
    Ok(UploadReceipt {
      image_id: stored.image_id,
      task_id,
      status: ImageStatus::New,
    })
  }

  pub async fn get(&self, image_id: Uuid) -> Result<Option<ImageRecord>, TransitionError> {
    Ok(self.status.store().find(image_id).await?)
  }
}
