use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{ImageRecord, ImageStatus, ThumbnailMap, UnknownStatus};

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),
  #[error("image {0} already exists")]
  Duplicate(Uuid),
  #[error("image {id} has an unreadable status: {source}")]
  Corrupt { id: Uuid, source: UnknownStatus },
}

/// Result of a conditional status write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
  Applied(ImageRecord),
  /// The record exists but its status was not one of the allowed sources.
  Rejected(ImageStatus),
  Missing,
}

/// Persistence for image records.
///
/// Status changes go through [`ImageStore::transition`] only, which writes the
/// status, the thumbnail map and `updated_at` in one statement guarded by the
/// allowed source states.
#[async_trait]
pub trait ImageStore: Send + Sync {
  async fn insert_new(&self, id: Uuid, original_path: &str) -> Result<ImageRecord, StoreError>;

  async fn find(&self, id: Uuid) -> Result<Option<ImageRecord>, StoreError>;

  async fn status(&self, id: Uuid) -> Result<Option<ImageStatus>, StoreError>;

  async fn transition(
    &self,
    id: Uuid,
    from: &[ImageStatus],
    to: ImageStatus,
    thumbnails: Option<&ThumbnailMap>,
  ) -> Result<TransitionOutcome, StoreError>;

  async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Debug, FromRow)]
struct ImageRow {
  id: Uuid,
  status: String,
  original_path: String,
  thumbnails: Option<Json<ThumbnailMap>>,
  created_at: DateTime<Utc>,
  updated_at: DateTime<Utc>,
}

impl TryFrom<ImageRow> for ImageRecord {
  type Error = StoreError;

  fn try_from(row: ImageRow) -> Result<Self, Self::Error> {
    let status = row
      .status
      .parse()
      .map_err(|source| StoreError::Corrupt { id: row.id, source })?;
    Ok(ImageRecord {
      id: row.id,
      status,
      original_path: row.original_path,
      thumbnails: row.thumbnails.map(|json| json.0).unwrap_or_default(),
      created_at: row.created_at,
      updated_at: row.updated_at,
    })
  }
}

const RECORD_COLUMNS: &str = "id, status, original_path, thumbnails, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgImageStore {
  pool: PgPool,
}

impl PgImageStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }
}

#[async_trait]
impl ImageStore for PgImageStore {
  async fn insert_new(&self, id: Uuid, original_path: &str) -> Result<ImageRecord, StoreError> {
    let sql = format!(
      "INSERT INTO images (id, status, original_path, thumbnails, created_at, updated_at)
       VALUES ($1, $2, $3, NULL, NOW(), NOW())
       RETURNING {RECORD_COLUMNS}"
    );
    let row = sqlx::query_as::<_, ImageRow>(&sql)
      .bind(id)
      .bind(ImageStatus::New.as_str())
      .bind(original_path)
      .fetch_one(&self.pool)
      .await
      .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => StoreError::Duplicate(id),
        other => StoreError::Database(other),
      })?;
    row.try_into()
  }

  async fn find(&self, id: Uuid) -> Result<Option<ImageRecord>, StoreError> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM images WHERE id = $1");
    sqlx::query_as::<_, ImageRow>(&sql)
      .bind(id)
      .fetch_optional(&self.pool)
      .await?
      .map(ImageRecord::try_from)
      .transpose()
  }

  async fn status(&self, id: Uuid) -> Result<Option<ImageStatus>, StoreError> {
    let status: Option<String> = sqlx::query_scalar("SELECT status FROM images WHERE id = $1")
      .bind(id)
      .fetch_optional(&self.pool)
      .await?;
    status
      .map(|s| s.parse().map_err(|source| StoreError::Corrupt { id, source }))
      .transpose()
  }

  async fn transition(
    &self,
    id: Uuid,
    from: &[ImageStatus],
    to: ImageStatus,
    thumbnails: Option<&ThumbnailMap>,
  ) -> Result<TransitionOutcome, StoreError> {
    let allowed: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
    let sql = format!(
      "UPDATE images SET status = $2, thumbnails = $3, updated_at = NOW()
       WHERE id = $1 AND status = ANY($4)
       RETURNING {RECORD_COLUMNS}"
    );
    let updated = sqlx::query_as::<_, ImageRow>(&sql)
      .bind(id)
      .bind(to.as_str())
      .bind(thumbnails.map(Json))
      .bind(allowed)
      .fetch_optional(&self.pool)
      .await?;

    match updated {
      Some(row) => Ok(TransitionOutcome::Applied(row.try_into()?)),
      None => Ok(match self.status(id).await? {
        Some(current) => TransitionOutcome::Rejected(current),
        None => TransitionOutcome::Missing,
      }),
    }
  }

  async fn ping(&self) -> Result<(), StoreError> {
    sqlx::query("SELECT 1").execute(&self.pool).await?;
    Ok(())
  }
}

#[cfg(test)]
pub(crate) mod memory {
  use super::*;
  use std::collections::HashMap;
  use std::sync::Arc;
  use std::sync::atomic::{AtomicBool, Ordering};
  use tokio::sync::Mutex;

  /// Same transition semantics as the Postgres store, kept in a map.
  #[derive(Debug, Clone, Default)]
  pub struct MemoryImageStore {
    records: Arc<Mutex<HashMap<Uuid, ImageRecord>>>,
    offline: Arc<AtomicBool>,
  }

  impl MemoryImageStore {
    pub fn new() -> Self {
      Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
      self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), StoreError> {
      if self.offline.load(Ordering::SeqCst) {
        return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
      }
      Ok(())
    }

    pub async fn len(&self) -> usize {
      self.records.lock().await.len()
    }
  }

  #[async_trait]
  impl ImageStore for MemoryImageStore {
    async fn insert_new(&self, id: Uuid, original_path: &str) -> Result<ImageRecord, StoreError> {
      self.check_online()?;
      let mut records = self.records.lock().await;
      if records.contains_key(&id) {
        return Err(StoreError::Duplicate(id));
      }
      let now = Utc::now();
      let record = ImageRecord {
        id,
        status: ImageStatus::New,
        original_path: original_path.to_string(),
        thumbnails: ThumbnailMap::new(),
        created_at: now,
        updated_at: now,
      };
      records.insert(id, record.clone());
      Ok(record)
    }

    async fn find(&self, id: Uuid) -> Result<Option<ImageRecord>, StoreError> {
      self.check_online()?;
      Ok(self.records.lock().await.get(&id).cloned())
    }

    async fn status(&self, id: Uuid) -> Result<Option<ImageStatus>, StoreError> {
      self.check_online()?;
      Ok(self.records.lock().await.get(&id).map(|r| r.status))
    }

    async fn transition(
      &self,
      id: Uuid,
      from: &[ImageStatus],
      to: ImageStatus,
      thumbnails: Option<&ThumbnailMap>,
    ) -> Result<TransitionOutcome, StoreError> {
      self.check_online()?;
      let mut records = self.records.lock().await;
      let Some(record) = records.get_mut(&id) else {
        return Ok(TransitionOutcome::Missing);
      };
      if !from.contains(&record.status) {
        return Ok(TransitionOutcome::Rejected(record.status));
      }
      record.status = to;
      record.thumbnails = thumbnails.cloned().unwrap_or_default();
      record.updated_at = Utc::now();
      Ok(TransitionOutcome::Applied(record.clone()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
      self.check_online()
    }
  }
}
