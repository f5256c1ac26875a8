//! Server-sent-events platform
//!
//! Each channel is one `GET {base-url}/realtime/v1/changes` stream. The
//! stream's own reconnect logic is disabled; reconnecting is the manager's job.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{ChangeCallback, ChannelStatus, PlatformError, RealtimeChannel, RealtimePlatform, StatusCallback};
use crate::config::PlatformConfig;
use crate::domain::ChangeEvent;

/// SSE event names that carry a change payload
const CHANGE_EVENTS: &[&str] = &["message", "change"];

/// [`RealtimePlatform`] backed by HTTP server-sent events
#[derive(Clone)]
pub struct SsePlatform {
    http: Client,
    base_url: String,
    api_key: String,
}

impl SsePlatform {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, PlatformError> {
        Self::with_connect_timeout(base_url, api_key, Duration::from_secs(10))
    }

    fn with_connect_timeout(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, PlatformError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(PlatformError::InvalidRequest(format!(
                "base url must start with http:// or https://, got '{}'",
                base_url
            )));
        }
        let http = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self {
            http,
            base_url,
            api_key: api_key.into(),
        })
    }

    /// Create a platform from configuration
    ///
    /// Reads the API key from the environment variable named in config.
    pub fn from_config(config: &PlatformConfig) -> Result<Self, PlatformError> {
        debug!(base_url = %config.base_url, "SsePlatform::from_config: called");
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| PlatformError::MissingApiKey(config.api_key_env.clone()))?;
        Self::with_connect_timeout(&config.base_url, api_key, config.connect_timeout())
    }

    pub fn changes_url(&self) -> String {
        format!("{}/realtime/v1/changes", self.base_url)
    }
}

#[async_trait]
impl RealtimePlatform for SsePlatform {
    fn open_channel(&self, name: &str) -> Box<dyn RealtimeChannel> {
        debug!(%name, "SsePlatform::open_channel: called");
        Box::new(SseChannel {
            name: name.to_string(),
            platform: self.clone(),
            bindings: Vec::new(),
            task: None,
        })
    }

    async fn close_channel(&self, mut channel: Box<dyn RealtimeChannel>) {
        debug!(name = %channel.name(), "SsePlatform::close_channel: called");
        channel.unsubscribe();
    }
}

#[derive(Clone)]
struct Binding {
    table: String,
    filter: Option<String>,
    callback: ChangeCallback,
}

struct SseChannel {
    name: String,
    platform: SsePlatform,
    bindings: Vec<Binding>,
    task: Option<JoinHandle<()>>,
}

impl SseChannel {
    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![("channel", self.name.clone())];
        for binding in &self.bindings {
            query.push(("table", binding.table.clone()));
            if let Some(filter) = &binding.filter {
                query.push(("filter", filter.clone()));
            }
        }
        query
    }
}

impl RealtimeChannel for SseChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_change(&mut self, table: &str, filter: Option<&str>, callback: ChangeCallback) {
        self.bindings.push(Binding {
            table: table.to_string(),
            filter: filter.map(str::to_string),
            callback,
        });
    }

    fn subscribe(&mut self, status: StatusCallback) {
        debug!(name = %self.name, bindings = self.bindings.len(), "SseChannel::subscribe: called");
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let request = self
            .platform
            .http
            .get(self.platform.changes_url())
            .query(&self.query())
            .header("apikey", self.platform.api_key.clone())
            .bearer_auth(&self.platform.api_key)
            .header("accept", "text/event-stream");

        let name = self.name.clone();
        let bindings = self.bindings.clone();
        self.task = Some(tokio::spawn(async move {
            run_stream(name, request, bindings, status).await;
        }));
    }

    fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            debug!(name = %self.name, "SseChannel::unsubscribe: aborting stream");
            task.abort();
        }
    }
}

impl Drop for SseChannel {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

async fn run_stream(name: String, request: reqwest::RequestBuilder, bindings: Vec<Binding>, status: StatusCallback) {
    let mut es = match EventSource::new(request) {
        Ok(es) => es,
        Err(e) => {
            warn!(channel = %name, error = %e, "run_stream: EventSource creation failed");
            status(ChannelStatus::ChannelError(PlatformError::Stream(e.to_string()).to_string()));
            return;
        }
    };
    es.set_retry_policy(Box::new(reqwest_eventsource::retry::Never));

    while let Some(event) = es.next().await {
        match event {
            Ok(Event::Open) => {
                info!(channel = %name, "Stream opened");
                status(ChannelStatus::Subscribed);
            }
            Ok(Event::Message(msg)) => {
                if !CHANGE_EVENTS.contains(&msg.event.as_str()) {
                    debug!(channel = %name, event = %msg.event, "run_stream: ignoring event");
                    continue;
                }
                match parse_change(&msg.data) {
                    Ok(change) => dispatch_change(&bindings, change),
                    Err(e) => warn!(channel = %name, error = %e, "Malformed change payload"),
                }
            }
            Err(EventSourceError::StreamEnded) => {
                info!(channel = %name, "Stream ended");
                status(ChannelStatus::Closed);
                break;
            }
            Err(e) => {
                warn!(channel = %name, error = %e, "Stream error");
                status(ChannelStatus::ChannelError(e.to_string()));
                break;
            }
        }
    }
    es.close();
}

fn parse_change(data: &str) -> Result<ChangeEvent, PlatformError> {
    Ok(serde_json::from_str(data)?)
}

fn dispatch_change(bindings: &[Binding], change: ChangeEvent) {
    for binding in bindings.iter().filter(|b| b.table == change.table) {
        (binding.callback)(change.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChangeKind;
    use std::sync::Mutex;

    #[test]
    fn test_rejects_non_http_base_url() {
        let err = SsePlatform::new("localhost:54321", "key").err().unwrap();
        assert!(matches!(err, PlatformError::InvalidRequest(_)));
    }

    #[test]
    fn test_changes_url_trims_trailing_slash() {
        let platform = SsePlatform::new("http://localhost:54321/", "key").unwrap();
        assert_eq!(platform.changes_url(), "http://localhost:54321/realtime/v1/changes");
    }

    #[test]
    fn test_query_lists_bindings() {
        let platform = SsePlatform::new("http://localhost:54321", "key").unwrap();
        let mut channel = SseChannel {
            name: "agent-showings".to_string(),
            platform,
            bindings: Vec::new(),
            task: None,
        };
        channel.on_change("showing_requests", Some("agent_id=eq.7"), Arc::new(|_| {}));
        channel.on_change("offers", None, Arc::new(|_| {}));

        assert_eq!(
            channel.query(),
            vec![
                ("channel", "agent-showings".to_string()),
                ("table", "showing_requests".to_string()),
                ("filter", "agent_id=eq.7".to_string()),
                ("table", "offers".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_and_dispatch_by_table() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let bindings = vec![
            Binding {
                table: "offers".to_string(),
                filter: None,
                callback: Arc::new(move |change: ChangeEvent| sink.lock().unwrap().push(change.kind)),
            },
            Binding {
                table: "messages".to_string(),
                filter: None,
                callback: Arc::new(|_| panic!("wrong table")),
            },
        ];

        let change = parse_change(r#"{"table":"offers","type":"DELETE","old_record":{"id":9}}"#).unwrap();
        dispatch_change(&bindings, change);
        assert_eq!(*seen.lock().unwrap(), vec![ChangeKind::Delete]);

        assert!(matches!(parse_change("not json"), Err(PlatformError::Json(_))));
    }

    #[test]
    #[serial_test::serial]
    fn test_from_config_requires_api_key() {
        let config = PlatformConfig {
            api_key_env: "TOURFEED_TEST_MISSING_KEY".to_string(),
            ..Default::default()
        };
        // SAFETY: serialized test; no other thread reads this variable
        unsafe { std::env::remove_var("TOURFEED_TEST_MISSING_KEY") };
        let err = SsePlatform::from_config(&config).err().unwrap();
        assert!(matches!(err, PlatformError::MissingApiKey(name) if name == "TOURFEED_TEST_MISSING_KEY"));
    }
}
