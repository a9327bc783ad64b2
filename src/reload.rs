//! Defines the [`Reloader`], the handle steps use to tell connected browsers
//! that staging output changed.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// The kind of asset a [`ReloadEvent`] refers to. Browsers can hot-swap
/// stylesheets; every other kind needs a full page reload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Page,
    Stylesheet,
    Script,
    Image,
    Font,
}

/// Sent to browsers after a step writes output. `paths` are relative to the
/// staging directory, with forward slashes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReloadEvent {
    pub kind: AssetKind,
    pub paths: Vec<String>,
}

/// A cloneable broadcast handle. Notifying with no subscribers is a no-op,
/// which is the normal case for production builds.
#[derive(Clone, Debug)]
pub struct Reloader {
    tx: broadcast::Sender<ReloadEvent>,
}

impl Reloader {
    pub fn new() -> Reloader {
        let (tx, _) = broadcast::channel(64);
        Reloader { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReloadEvent> {
        self.tx.subscribe()
    }

    /// Notifies every subscriber and returns how many there were.
    pub fn notify(&self, kind: AssetKind, paths: Vec<String>) -> usize {
        let count = paths.len();
        let receivers = self.tx.send(ReloadEvent { kind, paths }).unwrap_or(0);
        debug!(kind = ?kind, files = count, receivers, "reload notification");
        receivers
    }
}

impl Default for Reloader {
    fn default() -> Self {
        Reloader::new()
    }
}
