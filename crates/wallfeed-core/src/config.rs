use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_PAGE_SIZE, MAX_SOURCES, READINESS_POLL_MS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WallConfig {
    pub page_size: usize,
    pub readiness_timeout_ms: u64,
    pub max_sources: usize,
}

impl WallConfig {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            ..Self::default()
        }
    }

    /// Clamp values read from a file into their usable range.
    pub fn normalized(mut self) -> Self {
        self.page_size = self.page_size.max(1);
        self
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms.max(1))
    }
}

impl Default for WallConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            readiness_timeout_ms: READINESS_POLL_MS,
            max_sources: MAX_SOURCES,
        }
    }
}
