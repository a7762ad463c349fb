use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::storage::StorageLayout;
use crate::task::{CodecError, TaskMessage, ThumbnailSize};

#[derive(Debug, Error)]
pub enum PublishError {
  #[error("task channel unavailable: {0}")]
  Unavailable(#[from] lapin::Error),
  #[error("broker did not confirm task {0}")]
  NotConfirmed(Uuid),
  #[error("task channel did not answer within {0:?}")]
  TimedOut(Duration),
  #[error(transparent)]
  Codec(#[from] CodecError),
}

/// Durable hand-off of an encoded task. Returns only once the broker has
/// accepted the message.
#[async_trait]
pub trait TaskChannel: Send + Sync {
  async fn send(&self, body: &[u8], task_id: Uuid) -> Result<(), PublishError>;

  /// Cheap liveness probe for health reporting.
  async fn is_reachable(&self) -> bool;
}

/// Builds one [`TaskMessage`] per stored original and hands it to the channel.
#[derive(Debug, Clone)]
pub struct TaskPublisher<C> {
  channel: C,
  layout: StorageLayout,
  sizes: Vec<ThumbnailSize>,
}

impl<C: TaskChannel> TaskPublisher<C> {
  pub fn new(channel: C, layout: StorageLayout, sizes: Vec<ThumbnailSize>) -> Self {
    Self {
      channel,
      layout,
      sizes,
    }
  }

  pub fn channel(&self) -> &C {
    &self.channel
  }

  /// Returns the task id, which is also the message's correlation id.
  pub async fn publish(&self, image_id: Uuid, original_path: &Path) -> Result<Uuid, PublishError> {
    let task = TaskMessage::new(image_id, self.layout.to_relative(original_path), self.sizes.clone());
    let body = task.encode()?;
    let task_id = Uuid::new_v4();
    self.channel.send(&body, task_id).await?;
    info!(image_id = %image_id, task_id = %task_id, "task published");
    Ok(task_id)
  }
}

#[cfg(test)]
pub(crate) mod recording {
  use super::*;
  use std::sync::Arc;
  use std::sync::atomic::{AtomicBool, Ordering};
  use tokio::sync::Mutex;

  /// Keeps published bodies in memory; can be switched to fail like a down broker.
  #[derive(Debug, Clone, Default)]
  pub struct RecordingChannel {
    pub sent: Arc<Mutex<Vec<(Uuid, Vec<u8>)>>>,
    down: Arc<AtomicBool>,
  }

  impl RecordingChannel {
    pub fn set_down(&self, down: bool) {
      self.down.store(down, Ordering::SeqCst);
    }

    pub async fn tasks(&self) -> Vec<TaskMessage> {
      self
        .sent
        .lock()
        .await
        .iter()
        .map(|(_, body)| TaskMessage::decode(body).unwrap())
        .collect()
    }
  }

  #[async_trait]
  impl TaskChannel for RecordingChannel {
    async fn send(&self, body: &[u8], task_id: Uuid) -> Result<(), PublishError> {
      if self.down.load(Ordering::SeqCst) {
        return Err(PublishError::Unavailable(lapin::Error::InvalidChannelState(
          lapin::ChannelState::Closed,
        )));
      }
      self.sent.lock().await.push((task_id, body.to_vec()));
      Ok(())
    }

    async fn is_reachable(&self) -> bool {
      !self.down.load(Ordering::SeqCst)
    }
  }
}
