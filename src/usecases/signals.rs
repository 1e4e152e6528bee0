//! Coordination Signals - Shutdown, Poller Stop and Reconnect Generations
//!
//! All signals are level-triggered `watch` channels so a task that
//! subscribes late still observes the current state.

use tokio::sync::watch;
use tracing::info;

/// Shared coordination flags between the follower, the poller and main.
pub struct Signals {
  shutdown: watch::Sender<bool>,
  poller_stop: watch::Sender<bool>,
  reconnect: watch::Sender<u64>,
}

impl Default for Signals {
  fn default() -> Self {
    Self::new()
  }
}

impl Signals {
  pub fn new() -> Self {
    Self {
      shutdown: watch::Sender::new(false),
      poller_stop: watch::Sender::new(false),
      reconnect: watch::Sender::new(0),
    }
  }

  /// Ask every task to wind down.
  pub fn shutdown(&self) {
    info!("Shutdown requested");
    self.shutdown.send_replace(true);
  }

  /// Stop the poller after its current cycle step.
  pub fn stop_poller(&self) {
    self.poller_stop.send_replace(true);
  }

  /// Announce that the chain-sync session was re-opened. In-flight
  /// poller cycles abort when the generation changes.
  pub fn bump_reconnect(&self) -> u64 {
    self.reconnect.send_modify(|generation| *generation += 1);
    *self.reconnect.borrow()
  }

  pub fn is_shutdown(&self) -> bool {
    *self.shutdown.borrow()
  }

  pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
    self.shutdown.subscribe()
  }

  pub fn poller_stop_rx(&self) -> watch::Receiver<bool> {
    self.poller_stop.subscribe()
  }

  pub fn reconnect_rx(&self) -> watch::Receiver<u64> {
    self.reconnect.subscribe()
  }
}

/// Resolve once `rx` holds `true`. Never resolves if the sender is gone
/// while the flag is still `false`.
pub async fn raised(rx: &mut watch::Receiver<bool>) {
  if rx.wait_for(|flag| *flag).await.is_err() {
    std::future::pending::<()>().await;
  }
}
