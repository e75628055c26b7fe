use async_trait::async_trait;
use beehive::{
    BusContext, BusError, Core, Message, Module, ModuleError, ModuleRegistry, Operation,
    RestartPolicy,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Answers every request with its own content.
#[derive(Default)]
struct EchoModule {
    cleaned: AtomicBool,
}

#[async_trait]
impl Module for EchoModule {
    fn name(&self) -> &str {
        "echo"
    }

    fn group(&self) -> &str {
        "meta"
    }

    async fn start(&self, ctx: BusContext) -> Result<(), ModuleError> {
        loop {
            match ctx.receive("echo").await {
                Ok(msg) => {
                    let content = msg.content.clone();
                    ctx.send_resp(Message::new_response(&msg, content));
                }
                Err(BusError::ShutDown) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn cleanup(&self) {
        self.cleaned.store(true, Ordering::SeqCst);
    }
}

/// Fails on every start.
struct FlakyModule {
    starts: AtomicU32,
    policy: RestartPolicy,
}

#[async_trait]
impl Module for FlakyModule {
    fn name(&self) -> &str {
        "flaky"
    }

    fn group(&self) -> &str {
        "twin"
    }

    fn restart_policy(&self) -> Option<RestartPolicy> {
        Some(self.policy)
    }

    async fn start(&self, _ctx: BusContext) -> Result<(), ModuleError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Err("device twin store unavailable".into())
    }
}

/// Never meant to run.
struct DisabledModule;

#[async_trait]
impl Module for DisabledModule {
    fn name(&self) -> &str {
        "disabled"
    }

    fn group(&self) -> &str {
        "user"
    }

    fn enabled(&self) -> bool {
        false
    }

    async fn start(&self, _ctx: BusContext) -> Result<(), ModuleError> {
        panic!("disabled module must not start");
    }
}

#[tokio::test]
async fn core_starts_modules_and_routes_sync_requests() {
    let echo = Arc::new(EchoModule::default());
    let mut registry = ModuleRegistry::new();
    registry.register(echo.clone()).unwrap();
    registry.register(Arc::new(DisabledModule)).unwrap();

    let bus = BusContext::new();
    let handle = Core::start(registry, bus.clone()).unwrap();

    assert_eq!(bus.modules(), vec!["echo".to_string()]);
    assert_eq!(bus.group_members("meta"), vec!["echo".to_string()]);
    assert!(bus.group_members("user").is_empty());

    let req = Message::new()
        .route("edged", "meta", "default/pod/nginx", Operation::Query)
        .with_body("pod-spec");
    let resp = bus
        .send_sync("echo", req.clone(), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(resp.parent_id(), req.id());
    assert_eq!(resp.content, serde_json::json!("pod-spec"));

    handle.shutdown(Duration::from_secs(1)).await;
    assert!(echo.cleaned.load(Ordering::SeqCst));
    assert!(bus.is_shut_down());
}

#[tokio::test]
async fn sending_to_a_disabled_module_fails() {
    let mut registry = ModuleRegistry::new();
    registry.register(Arc::new(DisabledModule)).unwrap();
    let bus = BusContext::new();
    let handle = Core::start(registry, bus.clone()).unwrap();

    let err = bus.send("disabled", Message::new()).unwrap_err();
    assert_eq!(err, BusError::UnknownModule("disabled".into()));
    handle.shutdown(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn failing_module_is_restarted_until_retry_limit() {
    let flaky = Arc::new(FlakyModule {
        starts: AtomicU32::new(0),
        policy: RestartPolicy {
            retries: 2,
            interval_second: 1,
            ..RestartPolicy::on_failure()
        },
    });
    let mut registry = ModuleRegistry::new();
    registry.register(flaky.clone()).unwrap();

    let started = tokio::time::Instant::now();
    let mut handle = Core::start(registry, BusContext::new()).unwrap();
    handle.join().await;

    assert_eq!(flaky.starts.load(Ordering::SeqCst), 3);
    // the interval grows before each restart: 2s, then 4s
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(6), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(6100), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn first_restart_already_waits_the_grown_interval() {
    let flaky = Arc::new(FlakyModule {
        starts: AtomicU32::new(0),
        policy: RestartPolicy {
            retries: 1,
            interval_second: 5,
            growth_rate: 3.0,
            interval_limit: 10,
            ..RestartPolicy::on_failure()
        },
    });
    let mut registry = ModuleRegistry::new();
    registry.register(flaky.clone()).unwrap();

    let started = tokio::time::Instant::now();
    let mut handle = Core::start(registry, BusContext::new()).unwrap();
    handle.join().await;

    assert_eq!(flaky.starts.load(Ordering::SeqCst), 2);
    // min(10s, 5s * 3)
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(10), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(10100), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_pending_restarts() {
    let flaky = Arc::new(FlakyModule {
        starts: AtomicU32::new(0),
        policy: RestartPolicy {
            interval_second: 60,
            ..RestartPolicy::always()
        },
    });
    let mut registry = ModuleRegistry::new();
    registry.register(flaky.clone()).unwrap();

    let handle = Core::start(registry, BusContext::new()).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.shutdown(Duration::from_secs(1)).await;

    assert_eq!(flaky.starts.load(Ordering::SeqCst), 1);
}
