//! Subscription requests made by dashboard consumers

use std::sync::Arc;

use super::DataChange;

/// Callback invoked for every live change and every fallback refresh
///
/// Must tolerate redundant calls: a poll refresh and a live change can land
/// back to back for the same underlying update.
pub type DataChangeHandler = Arc<dyn Fn(DataChange) -> eyre::Result<()> + Send + Sync>;

/// A request to keep a live feed open for one (table, filter) pair
#[derive(Clone)]
pub struct SubscriptionRequest {
    /// Unique key; at most one live feed exists per name
    pub channel_name: String,
    pub table: String,
    /// Row filter predicate in platform syntax, e.g. `user_id=eq.1`
    pub filter: Option<String>,
    pub on_data_change: DataChangeHandler,
    /// A disabled request tears down any existing subscription for the name
    pub enabled: bool,
}

impl SubscriptionRequest {
    /// Create an enabled request without a filter
    pub fn new<F>(channel_name: impl Into<String>, table: impl Into<String>, on_data_change: F) -> Self
    where
        F: Fn(DataChange) -> eyre::Result<()> + Send + Sync + 'static,
    {
        Self {
            channel_name: channel_name.into(),
            table: table.into(),
            filter: None,
            on_data_change: Arc::new(on_data_change),
            enabled: true,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// A disabled request for `channel_name`; subscribing it tears the channel down
    pub fn disabled(channel_name: impl Into<String>) -> Self {
        Self::new(channel_name, "", |_| Ok(())).with_enabled(false)
    }
}

impl std::fmt::Debug for SubscriptionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRequest")
            .field("channel_name", &self.channel_name)
            .field("table", &self.table)
            .field("filter", &self.filter)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}
