pub mod cron;
pub mod server;

use std::sync::Arc;

use tokio::task::JoinSet;

use crate::{prelude::*, state::AppState};

#[async_trait::async_trait]
pub trait Plugin: Send + Sync {
  fn name(&self) -> &'static str {
    std::any::type_name::<Self>()
  }

  async fn start(&self, app: Arc<AppState>) -> anyhow::Result<()>;
}

pub struct App {
  plugins: Vec<Box<dyn Plugin>>,
}

impl App {
  pub fn new() -> Self {
    Self { plugins: Vec::new() }
  }

  pub fn register<P: Plugin + 'static>(mut self, plugin: P) -> Self {
    self.plugins.push(Box::new(plugin));
    self
  }

  /// Start every plugin concurrently and wait until all of them stop.
  pub async fn run(self, app: Arc<AppState>) {
    let mut tasks = JoinSet::new();

    for plugin in self.plugins {
      let app = app.clone();
      let name = plugin.name();

      info!("init `{}`", name);
      tasks.spawn(async move { (name, plugin.start(app).await) });
    }

    while let Some(joined) = tasks.join_next().await {
      match joined {
        Ok((name, Ok(()))) => debug!("`{}` stopped", name),
        Ok((name, Err(err))) => error!("failed `{}`: {err:#}", name),
        Err(err) => error!("plugin task aborted: {err}"),
      }
    }
  }
}
