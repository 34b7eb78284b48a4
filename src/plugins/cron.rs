use std::sync::Arc;

use async_trait::async_trait;
use tokio::time;

use crate::{plugins::Plugin, prelude::*, state::AppState};

/// Periodically re-derives every realtor's cached totals and repairs drift.
pub struct Reconcile;

#[async_trait]
impl Plugin for Reconcile {
  async fn start(&self, app: Arc<AppState>) -> anyhow::Result<()> {
    let every = app.config.reconcile_interval;
    if every.is_zero() {
      info!("Reconciliation disabled via config (0s interval)");
      return Ok(());
    }

    info!(
      "Reconciliation started (interval: {})",
      humantime::format_duration(every)
    );

    // first tick completes immediately, so a pass runs at startup
    let mut interval = time::interval(every);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
      interval.tick().await;

      match app.sv().commission.reconcile().await {
        Ok(report) if report.drifted.is_empty() => {
          debug!("Reconciled {} realtors, no drift", report.realtors)
        }
        Ok(report) => warn!(
          "Reconciliation repaired {} of {} realtors: {:?}",
          report.drifted.len(),
          report.realtors,
          report.drifted
        ),
        Err(err) => error!("Reconciliation failed: {}", err),
      }
    }
  }
}
