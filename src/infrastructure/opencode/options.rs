use std::time::Duration;

/// Exponential backoff for the event feed: `base_delay * 2^attempt`, no
/// jitter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> ReconnectPolicy {
        return ReconnectPolicy {
            base_delay: Duration::from_millis(1000),
            max_attempts: 10,
        };
    }
}

impl ReconnectPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        return self
            .base_delay
            .saturating_mul(2_u32.saturating_pow(attempt));
    }
}

/// Where and how to reach one OpenCode server. Each client owns its own
/// options, nothing here is global.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportOptions {
    pub base_url: String,
    pub directory: Option<String>,
    pub reconnect: ReconnectPolicy,
}

impl TransportOptions {
    pub fn new(base_url: &str) -> TransportOptions {
        return TransportOptions {
            base_url: base_url.trim_end_matches('/').to_string(),
            directory: None,
            reconnect: ReconnectPolicy::default(),
        };
    }

    pub fn with_directory(mut self, directory: Option<String>) -> TransportOptions {
        self.directory = directory.filter(|dir| return !dir.is_empty());
        return self;
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> TransportOptions {
        self.reconnect = reconnect;
        return self;
    }

    pub fn url(&self, path: &str) -> String {
        return format!("{}{path}", self.base_url);
    }
}
