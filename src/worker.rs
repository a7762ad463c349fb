use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions, BasicRejectOptions};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use imgpipe::{
  config::Config,
  database::setup_database,
  messaging::{Pacer, connect_forever, open_consumer},
  status::StatusMachine,
  store::{ImageStore, PgImageStore},
  worker_processing::{Disposition, TaskOutcome, TaskProcessor, peek_image_id},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();
  tracing_subscriber::registry()
    .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "imgpipe=info".into()))
    .with(tracing_subscriber::fmt::layer())
    .init();

  let config = Config::from_env()?;
  let layout = config.storage_layout().await?;
  let db_pool = setup_database(&config.database_url).await?;
  let processor = TaskProcessor::new(StatusMachine::new(PgImageStore::new(db_pool)), layout, config.worker_id.clone());
  info!(worker_id = %processor.worker_id(), "worker starting");

  // consumer setup failures and store outages back off independently
  let mut reconnect = Pacer::new();
  let mut requeue = Pacer::new();

  loop {
    let connection = connect_forever(&config.rabbitmq_url).await;
    let (_channel, mut consumer) = match open_consumer(&connection, processor.worker_id()).await {
      Ok(opened) => opened,
      Err(e) => {
        let delay = reconnect.failed();
        error!(worker_id = %processor.worker_id(), error = ?e, delay_secs = delay.as_secs(), "failed to open consumer");
        tokio::time::sleep(delay).await;
        continue;
      }
    };

    while let Some(delivery) = consumer.next().await {
      match delivery {
        Ok(delivery) => {
          reconnect.reset();
          handle_delivery(&processor, &mut requeue, delivery).await;
        }
        Err(e) => {
          error!(worker_id = %processor.worker_id(), error = ?e, "consumer error");
          break;
        }
      }
    }
    let delay = reconnect.failed();
    warn!(worker_id = %processor.worker_id(), delay_secs = delay.as_secs(), "consumer stream ended, reconnecting");
    tokio::time::sleep(delay).await;
  }
}

async fn handle_delivery<S: ImageStore>(processor: &TaskProcessor<S>, requeue: &mut Pacer, delivery: Delivery) {
  let correlation_id = delivery
    .properties
    .correlation_id()
    .as_ref()
    .map(|id| id.as_str().to_string())
    .unwrap_or_default();
  let image_id = peek_image_id(&delivery.data).map(|id| id.to_string()).unwrap_or_default();

  let result = processor.handle(&delivery.data).await;
  let settled = match Disposition::of(&result) {
    Disposition::Ack => {
      requeue.reset();
      if let Ok(TaskOutcome::Failed(reason)) = &result {
        warn!(task_id = %correlation_id, image_id = %image_id, reason = %reason, "task finished with ERROR");
      }
      delivery.ack(BasicAckOptions::default()).await
    }
    Disposition::Reject => {
      if let Err(e) = &result {
        error!(task_id = %correlation_id, body_len = delivery.data.len(), error = %e, "rejecting malformed task");
      }
      delivery.reject(BasicRejectOptions { requeue: false }).await
    }
    Disposition::Requeue => {
      // the broker redelivers at once with prefetch 1, so wait out the outage here
      let delay = requeue.failed();
      if let Err(e) = &result {
        warn!(task_id = %correlation_id, image_id = %image_id, error = %e, delay_secs = delay.as_secs(), "requeueing task");
      }
      tokio::time::sleep(delay).await;
      delivery
        .nack(BasicNackOptions { requeue: true, ..Default::default() })
        .await
    }
  };

  if let Err(e) = settled {
    error!(task_id = %correlation_id, image_id = %image_id, error = ?e, "failed to settle delivery");
  }
}
