//! Watch resumption position

use tracing::debug;

use crate::metrics;
use crate::resource::ResourceKind;

/// Last resource version seen for one kind in one namespace
///
/// Process-local: a restart begins from the empty cursor, which replays the
/// current state of every resource before going live.
#[derive(Debug, Clone)]
pub struct ResourceCursor {
    kind: ResourceKind,
    last_resource_version: String,
}

impl ResourceCursor {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            last_resource_version: String::new(),
        }
    }

    /// Resource version to resume from; empty means replay everything
    pub fn resource_version(&self) -> &str {
        &self.last_resource_version
    }

    pub fn is_empty(&self) -> bool {
        self.last_resource_version.is_empty()
    }

    /// Move past a processed event or bookmark
    pub fn advance(&mut self, resource_version: &str) {
        if resource_version.is_empty() {
            return;
        }
        self.last_resource_version = resource_version.to_string();
        if let Ok(numeric) = resource_version.parse::<f64>() {
            metrics::CURSOR_POSITION
                .with_label_values(&[self.kind.as_str()])
                .set(numeric);
        }
    }

    /// Forget the position after the API server expired it
    pub fn reset(&mut self) {
        debug!(kind = %self.kind, from = %self.last_resource_version, "Resetting watch cursor");
        self.last_resource_version.clear();
    }
}
