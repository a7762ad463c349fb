use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use imgpipe::{
  config::Config,
  database::setup_database,
  messaging::AmqpTaskChannel,
  publisher::{TaskChannel, TaskPublisher},
  routes::{form_limit, routes},
  service::ImageService,
  status::StatusMachine,
  store::PgImageStore,
  upload::UploadWriter,
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
  info!(root = %layout.root().display(), "storage ready");

  let db_pool = setup_database(&config.database_url).await?;
  let channel = AmqpTaskChannel::new(config.rabbitmq_url.clone());
  if !channel.is_reachable().await {
    warn!("RabbitMQ not reachable at startup; uploads will fail with 503 until it is");
  }

  let service = ImageService::new(
    UploadWriter::new(layout.clone(), config.max_upload_bytes),
    StatusMachine::new(PgImageStore::new(db_pool)),
    TaskPublisher::new(channel, layout, config.thumbnail_sizes.clone()),
  );

  let api = routes(Arc::new(service), form_limit(config.max_upload_bytes));

  info!(port = config.server_port, "API listening");
  warp::serve(api)
    .run(([0, 0, 0, 0], config.server_port))
    .await;
  Ok(())
}
