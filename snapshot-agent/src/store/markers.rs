//! Phase marker files for an external status reporter.
//!
//! Markers are created with `touch` and removed with `rm -f`, so repeating
//! either is harmless. Failures are logged and otherwise ignored; nothing in
//! this program reads the markers back.

use crate::remote::{path_arg, Channel};
use crate::snapshot::Layout;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Running,
    Preparing,
    BackingUp,
}

impl Marker {
    pub const ALL: [Marker; 3] = [Marker::Running, Marker::Preparing, Marker::BackingUp];

    pub fn file_name(&self) -> &'static str {
        match self {
            Marker::Running => ".running",
            Marker::Preparing => ".preparing",
            Marker::BackingUp => ".backingup",
        }
    }
}

pub struct MarkerStore {
    channel: Arc<dyn Channel>,
    layout: Layout,
    /// Dry runs leave the destination untouched
    enabled: bool,
}

impl MarkerStore {
    pub fn new(channel: Arc<dyn Channel>, layout: Layout, enabled: bool) -> Self {
        Self {
            channel,
            layout,
            enabled,
        }
    }

    pub async fn set(&self, marker: Marker) {
        self.apply(&["touch"], marker).await;
    }

    pub async fn clear(&self, marker: Marker) {
        self.apply(&["rm", "-f"], marker).await;
    }

    pub async fn clear_all(&self) {
        for marker in Marker::ALL {
            self.clear(marker).await;
        }
    }

    async fn apply(&self, command: &[&str], marker: Marker) {
        if !self.enabled {
            return;
        }
        let path = path_arg(&self.layout.marker(marker.file_name()));
        let mut argv = command.to_vec();
        argv.push(&path);

        match self.channel.run(&argv).await {
            Ok(out) if out.success() => {}
            Ok(_) => warn!("Could not update marker {}", marker.file_name()),
            Err(e) => warn!("Could not update marker {}: {}", marker.file_name(), e),
        }
    }
}
