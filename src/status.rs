//! The only code path that changes an image record's status.
//!
//! ```text
//! NEW ──> PROCESSING ──> DONE
//!             │  ^
//!             │  └─ re-entry on redelivery
//!             └────> ERROR
//! ```
//!
//! `DONE` and `ERROR` are terminal. Every transition is one conditional write
//! of status plus thumbnail map, so a reader never sees a `DONE` record
//! without its derivatives.

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::models::{ImageRecord, ImageStatus, ThumbnailMap};
use crate::store::{ImageStore, StoreError, TransitionOutcome};

#[derive(Debug, Error)]
pub enum TransitionError {
  #[error("image {0} not found")]
  NotFound(Uuid),
  #[error("illegal transition {from} -> {to} for image {id}")]
  Illegal {
    id: Uuid,
    from: ImageStatus,
    to: ImageStatus,
  },
  #[error("refusing to mark image {0} DONE without thumbnails")]
  EmptyThumbnails(Uuid),
  #[error(transparent)]
  Store(#[from] StoreError),
}

/// States from which `to` may be entered.
pub fn allowed_sources(to: ImageStatus) -> &'static [ImageStatus] {
  match to {
    ImageStatus::New => &[],
    ImageStatus::Processing => &[ImageStatus::New, ImageStatus::Processing],
    ImageStatus::Done | ImageStatus::Error => &[ImageStatus::Processing],
  }
}

#[cfg(test)]
fn can_transition(from: ImageStatus, to: ImageStatus) -> bool {
  allowed_sources(to).contains(&from)
}

#[derive(Debug, Clone)]
pub struct StatusMachine<S> {
  store: S,
}

impl<S: ImageStore> StatusMachine<S> {
  pub fn new(store: S) -> Self {
    Self { store }
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  /// Creates the record in `NEW`; the only way a record comes into existence.
  pub async fn create(&self, id: Uuid, original_path: &str) -> Result<ImageRecord, TransitionError> {
    Ok(self.store.insert_new(id, original_path).await?)
  }

  pub async fn current_status(&self, id: Uuid) -> Result<Option<ImageStatus>, TransitionError> {
    Ok(self.store.status(id).await?)
  }

  pub async fn begin_processing(&self, id: Uuid) -> Result<ImageRecord, TransitionError> {
    self.apply(id, ImageStatus::Processing, None).await
  }

  pub async fn complete(&self, id: Uuid, thumbnails: ThumbnailMap) -> Result<ImageRecord, TransitionError> {
    if thumbnails.is_empty() {
      return Err(TransitionError::EmptyThumbnails(id));
    }
    self.apply(id, ImageStatus::Done, Some(&thumbnails)).await
  }

  /// Clears the thumbnail map; files already written stay on disk.
  pub async fn fail(&self, id: Uuid) -> Result<ImageRecord, TransitionError> {
    self.apply(id, ImageStatus::Error, None).await
  }

  async fn apply(
    &self,
    id: Uuid,
    to: ImageStatus,
    thumbnails: Option<&ThumbnailMap>,
  ) -> Result<ImageRecord, TransitionError> {
    match self.store.transition(id, allowed_sources(to), to, thumbnails).await? {
      TransitionOutcome::Applied(record) => {
        debug!(image_id = %id, status = %to, "status updated");
        Ok(record)
      }
      TransitionOutcome::Rejected(from) => Err(TransitionError::Illegal { id, from, to }),
      TransitionOutcome::Missing => Err(TransitionError::NotFound(id)),
    }
  }
}
