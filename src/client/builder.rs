use super::{ConnectionManager, TabRuntime};
use crate::activity::ActivityRegistry;
use crate::infrastructure::TaskManager;
use crate::integration::{
    LivenessSource, Notifier, ReconnectControl, Redirector, SettingsProvider,
};
use crate::scheduler::{ActivityScheduler, IntervalProfile};
use crate::transport::{DefaultTransportFactory, TransportEndpoint, TransportFactory, TransportMode};
use crate::types::{
    DEFAULT_HEARTBEAT_PATH, DEFAULT_POLL_INTERVAL, DEFAULT_TRANSPORT_PATH, PROTOCOL_REBUILD_DELAY,
    RealtimeError, Result,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Same-origin base URL of the application (http or https)
    pub base_url: String,
    /// Transport path appended to the base URL
    pub path: String,
    /// Cookie header sent with every transport and heartbeat request
    pub credentials: Option<String>,
    pub heartbeat_path: String,
    pub poll_interval: Duration,
    /// Pause between closing a rejected transport and building its replacement
    pub protocol_rebuild_delay: Duration,
    /// Mode the first transport is built with
    pub transport_mode: TransportMode,
    pub intervals: IntervalProfile,
    pub debug: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            path: DEFAULT_TRANSPORT_PATH.to_string(),
            credentials: None,
            heartbeat_path: DEFAULT_HEARTBEAT_PATH.to_string(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL),
            protocol_rebuild_delay: Duration::from_millis(PROTOCOL_REBUILD_DELAY),
            transport_mode: TransportMode::default(),
            intervals: IntervalProfile::default(),
            debug: false,
        }
    }
}

/// Builder for TabRuntime that wires the collaborators together
pub struct TabRuntimeBuilder {
    options: RuntimeOptions,
    base_url: Url,
    heartbeat_url: String,
    factory: Option<Arc<dyn TransportFactory>>,
    notifier: Option<Arc<dyn Notifier>>,
    redirector: Option<Arc<dyn Redirector>>,
    settings: Option<Arc<dyn SettingsProvider>>,
}

impl TabRuntimeBuilder {
    /// Create a new builder
    pub fn new(options: RuntimeOptions) -> Result<Self> {
        if options.base_url.is_empty() {
            return Err(RealtimeError::Config("Base URL is required".to_string()));
        }

        let base_url = Url::parse(&options.base_url)?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(RealtimeError::Config(format!(
                "Base URL must be http or https, got '{}'",
                base_url.scheme()
            )));
        }
        let heartbeat_url = base_url.join(&options.heartbeat_path)?.to_string();

        Ok(Self {
            options,
            base_url,
            heartbeat_url,
            factory: None,
            notifier: None,
            redirector: None,
            settings: None,
        })
    }

    /// Replaces the websocket/long-polling transports
    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn redirector(mut self, redirector: Arc<dyn Redirector>) -> Self {
        self.redirector = Some(redirector);
        self
    }

    pub fn settings(mut self, settings: Arc<dyn SettingsProvider>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Build the runtime and spawn its watcher tasks
    pub fn build(self) -> TabRuntime {
        let factory: Arc<dyn TransportFactory> = match self.factory {
            Some(factory) => factory,
            None => Arc::new(DefaultTransportFactory::new(TransportEndpoint {
                base_url: self.base_url.clone(),
                path: self.options.path.clone(),
                credentials: self.options.credentials.clone(),
                poll_interval: self.options.poll_interval,
            })),
        };

        let connection = ConnectionManager::new(
            factory,
            self.options.transport_mode,
            self.options.protocol_rebuild_delay,
            self.notifier.clone(),
            self.redirector,
        );
        if self.options.debug {
            connection.set_debug(true);
        }

        let liveness: Arc<dyn LivenessSource> = connection.clone();
        let scheduler =
            ActivityScheduler::new(liveness, self.options.intervals, self.notifier.clone());

        let control: Arc<dyn ReconnectControl> = connection.clone();
        let registry = ActivityRegistry::new(
            Some(control),
            self.settings.as_deref(),
            self.notifier,
        );

        let runtime = TabRuntime {
            options: self.options,
            heartbeat_url: self.heartbeat_url,
            connection,
            scheduler,
            registry,
            heartbeat: Arc::new(Mutex::new(None)),
            tasks: Arc::new(Mutex::new(TaskManager::new())),
        };
        runtime.spawn_watchers();
        runtime
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(base_url: &str) -> RuntimeOptions {
        RuntimeOptions {
            base_url: base_url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_base_url_is_required() {
        let err = TabRuntimeBuilder::new(RuntimeOptions::default()).err().unwrap();
        assert!(matches!(err, RealtimeError::Config(_)));
    }

    #[test]
    fn test_base_url_must_be_http() {
        assert!(matches!(
            TabRuntimeBuilder::new(options("not a url")),
            Err(RealtimeError::UrlParse(_))
        ));
        assert!(matches!(
            TabRuntimeBuilder::new(options("ftp://tab.example.com")),
            Err(RealtimeError::Config(_))
        ));
    }

    #[test]
    fn test_heartbeat_url_is_same_origin() {
        let builder = TabRuntimeBuilder::new(options("https://tab.example.com/app/")).unwrap();
        assert_eq!(builder.heartbeat_url, "https://tab.example.com/api/heartbeat");
    }

    #[test]
    fn test_default_options() {
        let options = RuntimeOptions::default();
        assert_eq!(options.path, "/realtime");
        assert_eq!(options.protocol_rebuild_delay, Duration::from_secs(1));
        assert_eq!(options.transport_mode, TransportMode::Auto);
    }
}
