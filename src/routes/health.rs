use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use warp::Filter;

use super::with_service;
use crate::publisher::TaskChannel;
use crate::service::ImageService;
use crate::store::ImageStore;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Check {
  Ok,
  Error,
}

impl From<bool> for Check {
  fn from(ok: bool) -> Self {
    if ok { Check::Ok } else { Check::Error }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Overall {
  Ok,
  Degraded,
  Error,
}

#[derive(Debug, Serialize)]
pub struct Checks {
  pub database: Check,
  pub rabbitmq: Check,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
  pub status: Overall,
  pub checks: Checks,
}

impl HealthReport {
  pub fn from_checks(database: bool, rabbitmq: bool) -> Self {
    let status = match (database, rabbitmq) {
      (true, true) => Overall::Ok,
      (false, false) => Overall::Error,
      _ => Overall::Degraded,
    };
    Self {
      status,
      checks: Checks {
        database: database.into(),
        rabbitmq: rabbitmq.into(),
      },
    }
  }
}

pub fn health_route<S, C>(
  service: Arc<ImageService<S, C>>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone
where
  S: ImageStore + 'static,
  C: TaskChannel + 'static,
{
  warp::path("health")
    .and(warp::path::end())
    .and(warp::get())
    .and(with_service(service))
    .and_then(handle_health)
}

async fn handle_health<S, C>(service: Arc<ImageService<S, C>>) -> Result<impl warp::Reply, warp::Rejection>
where
  S: ImageStore,
  C: TaskChannel,
{
  let database = async {
    match tokio::time::timeout(PROBE_TIMEOUT, service.store().ping()).await {
      Ok(Ok(())) => true,
      Ok(Err(e)) => {
        warn!(error = %e, "database health probe failed");
        false
      }
      Err(_) => {
        warn!(timeout_secs = PROBE_TIMEOUT.as_secs(), "database health probe timed out");
        false
      }
    }
  };
  let rabbitmq = async {
    let ok = tokio::time::timeout(PROBE_TIMEOUT, service.channel().is_reachable())
      .await
      .unwrap_or(false);
    if !ok {
      warn!("RabbitMQ health probe failed");
    }
    ok
  };
  let (database, rabbitmq) = tokio::join!(database, rabbitmq);
  Ok(warp::reply::json(&HealthReport::from_checks(database, rabbitmq)))
}
