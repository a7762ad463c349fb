use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{ImageRecord, ImageStatus, ThumbnailMap};
use crate::storage::StorageLayout;
use crate::status::{StatusMachine, TransitionError};
use crate::store::ImageStore;
use crate::task::{CodecError, TaskMessage};
use crate::transform::Transformer;

#[derive(Debug, Error)]
pub enum ProcessError {
  #[error("malformed task payload: {0}")]
  Malformed(#[from] CodecError),
  #[error("status update failed: {0}")]
  Status(#[from] TransitionError),
}

/// How a task ended, from the record's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
  Done(ThumbnailMap),
  /// Transformation failed and the record is now `ERROR`.
  Failed(String),
  /// A redelivered task whose record had already reached a terminal state.
  AlreadyFinished(ImageStatus),
  /// No record with the task's image id.
  Missing,
}

/// What to tell the broker about a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
  Ack,
  /// Drop without requeue.
  Reject,
  /// Hand back to the queue for another attempt.
  Requeue,
}

impl Disposition {
  /// Every outcome that reached a terminal write is acked, including
  /// transformation failures. Only a failed status write is requeued.
  pub fn of(result: &Result<TaskOutcome, ProcessError>) -> Self {
    match result {
      Ok(_) => Disposition::Ack,
      Err(ProcessError::Malformed(_)) => Disposition::Reject,
      Err(ProcessError::Status(_)) => Disposition::Requeue,
    }
  }
}

pub struct TaskProcessor<S> {
  status: StatusMachine<S>,
  layout: StorageLayout,
  transformer: Transformer,
  worker_id: String,
}

impl<S: ImageStore> TaskProcessor<S> {
  pub fn new(status: StatusMachine<S>, layout: StorageLayout, worker_id: impl Into<String>) -> Self {
    Self {
      transformer: Transformer::new(layout.clone()),
      status,
      layout,
      worker_id: worker_id.into(),
    }
  }

  pub async fn handle(&self, body: &[u8]) -> Result<TaskOutcome, ProcessError> {
    let task = TaskMessage::decode(body)?;
    self.process(&task).await
  }

  pub async fn process(&self, task: &TaskMessage) -> Result<TaskOutcome, ProcessError> {
    let image_id = task.image_id;

    match self.status.current_status(image_id).await? {
      None => {
        warn!(worker_id = %self.worker_id, image_id = %image_id, "no record for task, dropping");
        return Ok(TaskOutcome::Missing);
      }
      Some(current) if current.is_terminal() => {
        info!(worker_id = %self.worker_id, image_id = %image_id, status = %current, "task already finished, skipping");
        return Ok(TaskOutcome::AlreadyFinished(current));
      }
      Some(_) => {}
    }

    if let Some(settled) = settle(self.status.begin_processing(image_id).await)? {
      return Ok(settled);
    }
    info!(worker_id = %self.worker_id, image_id = %image_id, sizes = task.sizes.len(), "processing image");

    let source = self.layout.resolve(&task.original_path);
    match self.transformer.run(source, image_id, task.sizes.clone()).await {
      Ok(derivatives) => {
        let thumbnails: ThumbnailMap = derivatives
          .iter()
          .map(|d| (d.size.label(), self.layout.to_relative(&d.path)))
          .collect();
        if let Some(settled) = settle(self.status.complete(image_id, thumbnails.clone()).await)? {
          return Ok(settled);
        }
        info!(worker_id = %self.worker_id, image_id = %image_id, "thumbnails ready");
        Ok(TaskOutcome::Done(thumbnails))
      }
      Err(e) => {
        error!(worker_id = %self.worker_id, image_id = %image_id, error = %e, "transformation failed");
        if let Some(settled) = settle(self.status.fail(image_id).await)? {
          return Ok(settled);
        }
        Ok(TaskOutcome::Failed(e.to_string()))
      }
    }
  }

  pub fn worker_id(&self) -> &str {
    &self.worker_id
  }

  #[cfg(test)]
  pub(crate) fn status(&self) -> &StatusMachine<S> {
    &self.status
  }
}

/// Turns a lost race (record moved on or vanished) into an outcome; only
/// store failures remain errors.
fn settle(result: Result<ImageRecord, TransitionError>) -> Result<Option<TaskOutcome>, TransitionError> {
  match result {
    Ok(_) => Ok(None),
    Err(TransitionError::Illegal { from, .. }) => Ok(Some(TaskOutcome::AlreadyFinished(from))),
    Err(TransitionError::NotFound(_)) => Ok(Some(TaskOutcome::Missing)),
    Err(e) => Err(e),
  }
}

/// Deliveries are logged by image id when the body can be read that far.
pub fn peek_image_id(body: &[u8]) -> Option<Uuid> {
  serde_json::from_slice::<serde_json::Value>(body)
    .ok()?
    .get("image_id")?
    .as_str()?
    .parse()
    .ok()
}
