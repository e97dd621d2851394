use std::sync::Arc;
use std::time::Duration;
use tabsync_realtime::{
    ActivityConfig, ChangeEvent, Notifier, Redirector, RuntimeOptions, SettingsProvider, TabRuntime,
    TerminationReason, Visibility,
};

struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify_error(&self, context: &str, message: &str) {
        println!("⚠️  [{}] {}", context, message);
    }
}

struct ConsoleRedirector;

impl Redirector for ConsoleRedirector {
    fn redirect(&self, reason: &TerminationReason) {
        println!("🚪 Session ended ({:?}), would redirect to /login", reason);
    }
}

struct EnvSettings;

impl SettingsProvider for EnvSettings {
    fn reconnect_interval_secs(&self) -> Result<u64, tabsync_realtime::types::BoxError> {
        Ok(std::env::var("RECONNECT_INTERVAL_SECS")?.parse()?)
    }
}

/// Runs one tab session against a live server
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing to see logs
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tabsync_realtime=debug")),
        )
        .init();

    let base_url = std::env::var("APP_URL").expect("APP_URL must be set in .env");
    let credentials = std::env::var("APP_COOKIE").ok();
    println!("📡 Connecting to: {}\n", base_url);

    let runtime = TabRuntime::builder(RuntimeOptions {
        base_url,
        credentials,
        debug: true,
        ..Default::default()
    })?
    .notifier(Arc::new(ConsoleNotifier))
    .redirector(Arc::new(ConsoleRedirector))
    .settings(Arc::new(EnvSettings))
    .build();

    for event in ChangeEvent::ALL {
        runtime.connection().on(event, move |payload| {
            println!("📨 {}: {}", event.as_str(), payload);
            Ok(())
        });
    }
    runtime.connection().on_resume(|| {
        println!("👀 Tab visible again, refreshing tables");
        Ok(())
    });

    runtime.registry().register(
        "presence",
        ActivityConfig::new(|| {
            println!("🟢 presence ping");
            Ok(())
        })
        .with_stop(|| {
            println!("⚪ presence stopped");
            Ok(())
        })
        .with_interval(Duration::from_secs(30)),
    )?;

    runtime.init().await?;
    runtime.start_heartbeat("files");

    let mut states = runtime.connection().subscribe_state();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            println!("🔌 {:?} via {}", state.phase, state.transport_mode);
        }
    });

    tokio::time::sleep(Duration::from_secs(20)).await;

    println!("🙈 Simulating tab hidden/visible...");
    runtime.connection().set_visibility(Visibility::Hidden).await?;
    runtime.connection().set_visibility(Visibility::Visible).await?;

    tokio::time::sleep(Duration::from_secs(40)).await;
    for info in runtime.registry().activities() {
        println!("📋 {} running={} interval={:?}", info.name, info.running, info.interval);
    }

    runtime.shutdown().await?;
    println!("👋 Done");
    Ok(())
}
