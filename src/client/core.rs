use super::{ConnectionManager, RuntimeOptions, TabRuntimeBuilder};
use crate::activity::ActivityRegistry;
use crate::infrastructure::{HeartbeatClient, HeartbeatMonitor, TaskManager};
use crate::scheduler::ActivityScheduler;
use crate::types::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

/// Background tasks owned by the runtime itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum RuntimeTask {
    TerminationWatcher,
    IntervalWatcher,
}

/// The composition root of a browser tab's realtime layer.
///
/// `TabRuntime` owns the [`ConnectionManager`], the [`ActivityScheduler`] and the
/// [`ActivityRegistry`], wires them to one another and to the external collaborators,
/// and reacts to forced session termination by halting all background work.
///
/// # Example
///
/// ```no_run
/// use tabsync_realtime::{ActivityConfig, RuntimeOptions, TabRuntime};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let runtime = TabRuntime::new(RuntimeOptions {
///     base_url: "https://files.example.com".to_string(),
///     ..Default::default()
/// })?;
///
/// runtime.init().await?;
/// runtime.connection().on("file_changed", |payload| {
///     println!("file changed: {}", payload);
///     Ok(())
/// });
/// runtime.registry().register(
///     "presence",
///     ActivityConfig::new(|| Ok(())).with_interval(Duration::from_secs(30)),
/// )?;
/// runtime.start_heartbeat("files");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TabRuntime {
    pub(crate) options: RuntimeOptions,
    pub(crate) heartbeat_url: String,
    pub(crate) connection: Arc<ConnectionManager>,
    pub(crate) scheduler: Arc<ActivityScheduler>,
    pub(crate) registry: Arc<ActivityRegistry>,
    pub(crate) heartbeat: Arc<Mutex<Option<Arc<HeartbeatMonitor>>>>,
    pub(crate) tasks: Arc<Mutex<TaskManager<RuntimeTask>>>,
}

impl TabRuntime {
    /// Creates a runtime with the default transports and no collaborators.
    ///
    /// Nothing connects until [`init()`](Self::init) is called.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Config`](crate::types::RealtimeError::Config) or
    /// [`RealtimeError::UrlParse`](crate::types::RealtimeError::UrlParse) if the base URL
    /// is missing or malformed.
    pub fn new(options: RuntimeOptions) -> Result<Self> {
        TabRuntimeBuilder::new(options).map(|builder| builder.build())
    }

    pub fn builder(options: RuntimeOptions) -> Result<TabRuntimeBuilder> {
        TabRuntimeBuilder::new(options)
    }

    /// Connects and starts both liveness probes.
    pub async fn init(&self) -> Result<()> {
        self.connection.init().await?;
        self.scheduler.init();
        self.registry.init();
        Ok(())
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn scheduler(&self) -> &Arc<ActivityScheduler> {
        &self.scheduler
    }

    pub fn registry(&self) -> &Arc<ActivityRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// Starts the HTTP heartbeat for `page`, replacing any earlier one.
    ///
    /// The timer is re-installed automatically whenever the scheduler clears its timers
    /// on a liveness transition.
    pub fn start_heartbeat(&self, page: impl Into<String>) -> Duration {
        let client = HeartbeatClient::new(self.heartbeat_url.clone(), self.options.credentials.clone());
        let monitor = Arc::new(HeartbeatMonitor::new(
            client,
            page,
            Arc::downgrade(&self.connection),
        ));
        *self.heartbeat.lock() = Some(Arc::clone(&monitor));
        monitor.spawn_on(&self.scheduler)
    }

    pub fn is_terminated(&self) -> bool {
        self.connection.is_terminated()
    }

    /// Stops every background task and closes the transport.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down tab runtime");
        self.tasks.lock().abort_all();
        self.heartbeat.lock().take();
        self.registry.halt();
        self.scheduler.halt();
        self.connection.disconnect().await
    }

    pub(crate) fn spawn_watchers(&self) {
        let mut tasks = self.tasks.lock();

        // Forced termination halts all background work; nothing may reconnect after it.
        let mut termination = self.connection.subscribe_termination();
        let registry = Arc::downgrade(&self.registry);
        let scheduler = Arc::downgrade(&self.scheduler);
        tasks.spawn(RuntimeTask::TerminationWatcher, async move {
            while termination.changed().await.is_ok() {
                let reason = termination.borrow_and_update().clone();
                let Some(reason) = reason else {
                    continue;
                };
                tracing::warn!("Session ended ({:?}), halting background work", reason);
                if let Some(registry) = registry.upgrade() {
                    registry.halt();
                }
                if let Some(scheduler) = scheduler.upgrade() {
                    scheduler.halt();
                }
                break;
            }
            tracing::info!("Termination watcher task finished");
        });

        let mut changes = self.scheduler.subscribe_changes();
        let scheduler = Arc::downgrade(&self.scheduler);
        let heartbeat = Arc::clone(&self.heartbeat);
        tasks.spawn(RuntimeTask::IntervalWatcher, async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        tracing::debug!("Re-installing timers after change to {:?}", change);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("Interval watcher skipped {} changes", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
                let Some(scheduler) = scheduler.upgrade() else {
                    break;
                };
                let monitor = heartbeat.lock().clone();
                if let Some(monitor) = monitor {
                    monitor.spawn_on(&scheduler);
                }
            }
            tracing::info!("Interval watcher task finished");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityConfig;
    use crate::client::connection::tests::{MockFactory, RecordingRedirector, settle};
    use crate::integration::{LivenessSource, TerminationReason};
    use crate::scheduler::ActivityKind;
    use crate::types::RealtimeError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn runtime(factory: &Arc<MockFactory>, redirector: &Arc<RecordingRedirector>) -> TabRuntime {
        TabRuntime::builder(RuntimeOptions {
            base_url: "http://localhost:8080".to_string(),
            ..Default::default()
        })
        .unwrap()
        .transport_factory(factory.clone())
        .redirector(redirector.clone())
        .build()
    }

    /// Local HTTP endpoint answering every request with `status`; records raw requests.
    async fn respond_with(status: &'static str) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let request = read_request(&mut stream).await;
                seen.lock().push(request);
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        (base_url, requests)
    }

    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_ascii_lowercase();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|value| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    async fn advance(ms: u64) {
        tokio::time::advance(Duration::from_millis(ms)).await;
        settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_forbidden_redirects_once_and_stops_retrying() {
        let factory = Arc::new(MockFactory::default());
        let redirector = Arc::new(RecordingRedirector::default());
        let runtime = runtime(&factory, &redirector);
        runtime.init().await.unwrap();
        factory.connect_nth(0);
        settle().await;

        let monitor = HeartbeatMonitor::new(
            HeartbeatClient::new(runtime.heartbeat_url.clone(), None),
            "users",
            Arc::downgrade(runtime.connection()),
        );
        for _ in 0..2 {
            monitor
                .handle_outcome(Err(RealtimeError::SessionTerminated { status: Some(403) }))
                .await
                .unwrap();
        }
        settle().await;

        assert_eq!(
            *redirector.calls.lock(),
            vec![TerminationReason::HeartbeatRejected { status: 403 }]
        );
        assert!(runtime.is_terminated());
        assert!(runtime.registry().is_halted());

        advance(30_000).await;
        assert_eq!(runtime.registry().supervisor().attempts(), 0);
        assert_eq!(factory.count(), 1);
        assert_eq!(
            *factory.log.lock(),
            vec!["create:auto", "open:auto", "close:auto"]
        );
    }

    #[tokio::test]
    async fn test_heartbeat_403_over_http_terminates_session() {
        let (base_url, requests) = respond_with("403 Forbidden").await;
        let factory = Arc::new(MockFactory::default());
        let redirector = Arc::new(RecordingRedirector::default());
        let runtime = TabRuntime::builder(RuntimeOptions {
            base_url,
            credentials: Some("sid=abc".to_string()),
            ..Default::default()
        })
        .unwrap()
        .transport_factory(factory.clone())
        .redirector(redirector.clone())
        .build();
        runtime.init().await.unwrap();

        let monitor = HeartbeatMonitor::new(
            HeartbeatClient::new(
                runtime.heartbeat_url.clone(),
                runtime.options().credentials.clone(),
            ),
            "files",
            Arc::downgrade(runtime.connection()),
        );
        monitor.beat().await.unwrap();
        monitor.beat().await.unwrap();
        settle().await;

        assert_eq!(
            *redirector.calls.lock(),
            vec![TerminationReason::HeartbeatRejected { status: 403 }]
        );
        assert!(runtime.is_terminated());
        assert!(runtime.registry().is_halted());
        assert!(runtime.connection().transport().await.is_none());

        let requests = requests.lock();
        assert_eq!(requests.len(), 2);
        let first = requests[0].to_ascii_lowercase();
        assert!(first.starts_with("post /api/heartbeat "), "{}", first);
        assert!(first.contains("cookie: sid=abc"), "{}", first);
        assert!(requests[0].ends_with(r#"{"page":"files"}"#), "{}", requests[0]);
        drop(requests);

        runtime.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_activities_and_supervisor_reuses_transport() {
        let factory = Arc::new(MockFactory::default());
        let redirector = Arc::new(RecordingRedirector::default());
        let runtime = runtime(&factory, &redirector);
        runtime.init().await.unwrap();
        factory.connect_nth(0);
        advance(1_000).await;
        assert!(runtime.registry().is_connected());

        let starts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&starts);
        runtime
            .registry()
            .register(
                "presence",
                ActivityConfig::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();
        assert!(runtime.registry().is_running("presence"));

        factory.drop_nth(0);
        settle().await;
        advance(1_000).await;
        assert!(!runtime.registry().is_running("presence"));

        advance(5_000).await;
        assert!(factory.log.lock().contains(&"reconnect:auto".to_string()));
        assert_eq!(factory.count(), 1);

        factory.connect_nth(0);
        advance(1_000).await;
        assert!(runtime.registry().is_running("presence"));
        assert_eq!(starts.load(Ordering::SeqCst), 2);
        assert!(redirector.calls.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timer_survives_liveness_transitions() {
        let factory = Arc::new(MockFactory::default());
        let redirector = Arc::new(RecordingRedirector::default());
        let runtime = runtime(&factory, &redirector);
        runtime.init().await.unwrap();
        factory.connect_nth(0);
        advance(1_000).await;

        let period = runtime.start_heartbeat("files");
        assert_eq!(period, Duration::from_secs(30));
        settle().await;
        assert!(runtime.scheduler().has_interval(ActivityKind::Heartbeat));

        factory.drop_nth(0);
        advance(1_000).await;
        assert!(!runtime.connection().is_connected());
        assert!(runtime.scheduler().has_interval(ActivityKind::Heartbeat));
        assert_eq!(
            runtime.scheduler().optimal_interval(ActivityKind::Heartbeat),
            Duration::from_secs(60)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_transport_and_halts() {
        let factory = Arc::new(MockFactory::default());
        let redirector = Arc::new(RecordingRedirector::default());
        let runtime = runtime(&factory, &redirector);
        runtime.init().await.unwrap();

        runtime.shutdown().await.unwrap();
        assert!(runtime.registry().is_halted());
        assert!(runtime.connection().transport().await.is_none());
        assert_eq!(factory.log.lock().last().map(String::as_str), Some("close:auto"));
        assert!(redirector.calls.lock().is_empty());
    }
}
