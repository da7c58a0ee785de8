use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use quilt_protocols::{ActivationEvent, ActivationEventDefinition, Manifest};
use serde_json::json;

use super::*;
use crate::context::ActivationContext;
use crate::loader::LocalLoader;
use crate::registry::manifest::AssertionOptions;

struct Fixture {
    diagnostics: Arc<Diagnostics>,
    event_bus: Arc<EventBus>,
    engine: Arc<ActivationEngine>,
}

fn setup(
    manifest_list: Vec<Manifest>,
    events: Vec<ActivationEventDefinition>,
    loader: Arc<LocalLoader>,
    strict: bool,
) -> Fixture {
    let diagnostics = Arc::new(Diagnostics::new(strict));
    let event_bus = Arc::new(EventBus::new());
    let manifests = ManifestRegistry::new(
        manifest_list,
        events,
        AssertionOptions::default(),
        diagnostics.clone(),
    )
    .unwrap();
    let contexts = Arc::new(ContextManager::new(diagnostics.clone()));
    let contributions = Arc::new(ContributionManager::new(
        diagnostics.clone(),
        event_bus.clone(),
        AssertionOptions::default(),
    ));
    let engine = Arc::new(ActivationEngine::new(
        event_bus.clone(),
        loader,
        diagnostics.clone(),
    ));
    contexts.wire(manifests.clone(), contributions.clone());
    contexts.wire_engine(engine.clone());
    contributions.wire(manifests.clone(), contexts.clone());
    engine.wire(manifests, contexts, contributions);
    Fixture {
        diagnostics,
        event_bus,
        engine,
    }
}

struct Recorder {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
    fail_activation: bool,
}

impl Recorder {
    fn install(loader: &LocalLoader, name: &str, log: &Arc<Mutex<Vec<String>>>) {
        loader.register(
            name,
            Arc::new(Recorder {
                name: name.to_string(),
                log: log.clone(),
                fail_activation: false,
            }),
        );
    }
}

#[async_trait]
impl ExtensionImpl for Recorder {
    async fn activate(
        &self,
        _ctx: &Arc<ActivationContext>,
    ) -> Result<Option<ExtensionApi>, KernelError> {
        if self.fail_activation {
            return Err(KernelError::Custom("boom".to_string()));
        }
        self.log.lock().push(format!("activate:{}", self.name));
        Ok(Some(Arc::new(self.name.clone())))
    }

    fn deactivate(&self, _ctx: &Arc<ActivationContext>) {
        self.log.lock().push(format!("deactivate:{}", self.name));
    }
}

fn manifest(name: &str) -> Manifest {
    Manifest::new(name).with_activation_event("initialized")
}

fn initialized_only() -> Vec<ActivationEventDefinition> {
    vec![ActivationEventDefinition::new("initialized")]
}

fn position(log: &[String], entry: &str) -> usize {
    log.iter().position(|e| e == entry).unwrap()
}

#[tokio::test]
async fn test_activation_follows_dependency_waves() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let loader = Arc::new(LocalLoader::new());
    for name in ["a", "b", "c", "d"] {
        Recorder::install(&loader, name, &log);
    }
    let fixture = setup(
        vec![
            manifest("a").with_dependency("b", "*").with_dependency("c", "*"),
            manifest("b").with_dependency("d", "*"),
            manifest("c").with_dependency("d", "*"),
            manifest("d"),
        ],
        initialized_only(),
        loader,
        true,
    );

    fixture.engine.activate("initialized", None, false).await.unwrap();

    let log = log.lock().clone();
    assert_eq!(log.len(), 4);
    assert!(position(&log, "activate:d") < position(&log, "activate:b"));
    assert!(position(&log, "activate:d") < position(&log, "activate:c"));
    assert!(position(&log, "activate:b") < position(&log, "activate:a"));
    assert!(position(&log, "activate:c") < position(&log, "activate:a"));
    assert!(fixture.engine.is_activated("a"));
}

#[tokio::test]
async fn test_repeated_event_is_idempotent() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let loader = Arc::new(LocalLoader::new());
    Recorder::install(&loader, "solo", &log);
    let fixture = setup(vec![manifest("solo")], initialized_only(), loader, true);

    fixture.engine.activate("initialized", None, false).await.unwrap();
    fixture.engine.activate("initialized", None, false).await.unwrap();
    assert_eq!(log.lock().len(), 1);

    // A repeat run re-fires the event but already-active extensions stay put.
    fixture.engine.activate("initialized", None, true).await.unwrap();
    assert_eq!(log.lock().len(), 1);
}

#[tokio::test]
async fn test_undeclared_event_is_reported() {
    let loader = Arc::new(LocalLoader::new());
    let fixture = setup(vec![manifest("solo")], initialized_only(), loader, false);

    fixture.engine.activate("ghost", None, false).await.unwrap();
    let entries = fixture.diagnostics.entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].contains("not defined"));
    assert!(!fixture.engine.is_activated("solo"));
}

#[tokio::test]
async fn test_guard_filters_candidates() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let loader = Arc::new(LocalLoader::new());
    Recorder::install(&loader, "guarded", &log);
    let guarded = Manifest::new("guarded").with_activation_event(ActivationEvent::Guarded {
        name: "initialized".to_string(),
        when: "mode == 'edit'".to_string(),
    });
    let fixture = setup(vec![guarded], initialized_only(), loader, true);

    let viewer = json!({ "mode": "view" });
    fixture
        .engine
        .activate("initialized", viewer.as_object(), false)
        .await
        .unwrap();
    assert!(!fixture.engine.is_activated("guarded"));

    let editor = json!({ "mode": "edit" });
    fixture
        .engine
        .activate("initialized", editor.as_object(), true)
        .await
        .unwrap();
    assert!(fixture.engine.is_activated("guarded"));
}

#[tokio::test]
async fn test_invalid_guard_collected_in_permissive_mode() {
    let loader = Arc::new(LocalLoader::new());
    let guarded = Manifest::new("guarded").with_activation_event(ActivationEvent::Guarded {
        name: "initialized".to_string(),
        when: "mode &&".to_string(),
    });
    let fixture = setup(vec![guarded], initialized_only(), loader, false);

    fixture.engine.activate("initialized", None, false).await.unwrap();
    assert!(!fixture.engine.is_activated("guarded"));
    assert_eq!(fixture.diagnostics.entries().len(), 1);
}

#[tokio::test]
async fn test_deactivate_only_from_top_of_stack() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let loader = Arc::new(LocalLoader::new());
    Recorder::install(&loader, "solo", &log);
    let fixture = setup(
        vec![manifest("solo")],
        vec![
            ActivationEventDefinition::new("initialized"),
            ActivationEventDefinition::new("workspaceReady").after("initialized"),
        ],
        loader,
        true,
    );

    fixture.engine.activate("initialized", None, false).await.unwrap();
    fixture.engine.activate("workspaceReady", None, false).await.unwrap();

    // "initialized" is buried under "workspaceReady".
    fixture.engine.deactivate("initialized").unwrap();
    assert!(fixture.engine.is_activated("solo"));

    fixture.engine.deactivate("workspaceReady").unwrap();
    fixture.engine.deactivate("initialized").unwrap();
    assert!(!fixture.engine.is_activated("solo"));
    assert_eq!(log.lock().last().unwrap(), "deactivate:solo");
}

#[tokio::test]
async fn test_reload_with_same_event_loads_once() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let loads = Arc::new(AtomicUsize::new(0));

    struct CountingLoader {
        inner: LocalLoader,
        loads: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ExtensionLoader for CountingLoader {
        async fn load(
            &self,
            manifest: &Manifest,
        ) -> Result<Arc<dyn ExtensionImpl>, KernelError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load(manifest).await
        }
    }

    let inner = LocalLoader::new();
    Recorder::install(&inner, "solo", &log);
    let loader = Arc::new(CountingLoader {
        inner,
        loads: loads.clone(),
    });

    let diagnostics = Arc::new(Diagnostics::new(true));
    let event_bus = Arc::new(EventBus::new());
    let manifests = ManifestRegistry::new(
        vec![manifest("solo")],
        initialized_only(),
        AssertionOptions::default(),
        diagnostics.clone(),
    )
    .unwrap();
    let contexts = Arc::new(ContextManager::new(diagnostics.clone()));
    let contributions = Arc::new(ContributionManager::new(
        diagnostics.clone(),
        event_bus.clone(),
        AssertionOptions::default(),
    ));
    let engine = Arc::new(ActivationEngine::new(event_bus, loader, diagnostics));
    contexts.wire(manifests.clone(), contributions.clone());
    contexts.wire_engine(engine.clone());
    contributions.wire(manifests.clone(), contexts.clone());
    engine.wire(manifests, contexts, contributions);

    engine.activate("initialized", None, false).await.unwrap();
    engine.deactivate("initialized").unwrap();
    engine.activate("initialized", None, false).await.unwrap();

    assert_eq!(
        log.lock().clone(),
        vec![
            "activate:solo".to_string(),
            "deactivate:solo".to_string(),
            "activate:solo".to_string(),
        ]
    );
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_single_deactivate_unwinds_repeat_fires() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let loader = Arc::new(LocalLoader::new());
    Recorder::install(&loader, "solo", &log);
    let fixture = setup(vec![manifest("solo")], initialized_only(), loader, true);

    fixture.engine.activate("initialized", None, false).await.unwrap();
    // A repeat fire must not grow the fired-event stack.
    fixture.engine.activate("initialized", None, true).await.unwrap();

    fixture.engine.deactivate("initialized").unwrap();
    assert!(!fixture.engine.is_activated("solo"));

    // The event left the stack entirely, so a fresh fire reloads.
    fixture.engine.activate("initialized", None, false).await.unwrap();
    assert!(fixture.engine.is_activated("solo"));
    assert_eq!(
        log.lock().clone(),
        vec![
            "activate:solo".to_string(),
            "deactivate:solo".to_string(),
            "activate:solo".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_deactivated_notification_precedes_context_destruction() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let loader = Arc::new(LocalLoader::new());
    Recorder::install(&loader, "solo", &log);

    let diagnostics = Arc::new(Diagnostics::new(true));
    let event_bus = Arc::new(EventBus::new());
    let manifests = ManifestRegistry::new(
        vec![manifest("solo")],
        initialized_only(),
        AssertionOptions::default(),
        diagnostics.clone(),
    )
    .unwrap();
    let contexts = Arc::new(ContextManager::new(diagnostics.clone()));
    let contributions = Arc::new(ContributionManager::new(
        diagnostics.clone(),
        event_bus.clone(),
        AssertionOptions::default(),
    ));
    let engine = Arc::new(ActivationEngine::new(
        event_bus.clone(),
        loader,
        diagnostics,
    ));
    contexts.wire(manifests.clone(), contributions.clone());
    contexts.wire_engine(engine.clone());
    contributions.wire(manifests.clone(), contexts.clone());
    engine.wire(manifests, contexts.clone(), contributions);

    let context_alive = Arc::new(Mutex::new(None));
    let observed = context_alive.clone();
    let peeked = contexts.clone();
    event_bus.subscribe(move |event| {
        if let KernelEvent::Deactivated { extension } = event {
            *observed.lock() = Some(peeked.peek(extension).is_some());
        }
    });

    engine.activate("initialized", None, false).await.unwrap();
    engine.deactivate("initialized").unwrap();

    assert_eq!(*context_alive.lock(), Some(true));
    assert!(contexts.peek("solo").is_none());
}

#[tokio::test]
async fn test_deactivation_runs_in_reverse_dependency_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let loader = Arc::new(LocalLoader::new());
    for name in ["a", "b"] {
        Recorder::install(&loader, name, &log);
    }
    let fixture = setup(
        vec![manifest("a").with_dependency("b", "*"), manifest("b")],
        initialized_only(),
        loader,
        true,
    );

    fixture.engine.activate("initialized", None, false).await.unwrap();
    fixture.engine.deactivate("initialized").unwrap();

    let log = log.lock().clone();
    assert_eq!(
        log,
        vec![
            "activate:b".to_string(),
            "activate:a".to_string(),
            "deactivate:a".to_string(),
            "deactivate:b".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_deactivation_event_group_included() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let loader = Arc::new(LocalLoader::new());
    Recorder::install(&loader, "solo", &log);
    let solo = Manifest::new("solo")
        .with_activation_event("initialized")
        .with_deactivation_event("workspaceReady");
    let fixture = setup(
        vec![solo],
        vec![
            ActivationEventDefinition::new("initialized"),
            ActivationEventDefinition::new("workspaceReady").after("initialized"),
        ],
        loader,
        true,
    );

    fixture.engine.activate("initialized", None, false).await.unwrap();
    fixture.engine.activate("workspaceReady", None, false).await.unwrap();

    fixture.engine.deactivate("workspaceReady").unwrap();
    assert!(!fixture.engine.is_activated("solo"));
}

#[tokio::test]
async fn test_api_published_and_removed() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let loader = Arc::new(LocalLoader::new());
    Recorder::install(&loader, "solo", &log);
    let fixture = setup(vec![manifest("solo")], initialized_only(), loader, true);

    fixture.engine.activate("initialized", None, false).await.unwrap();
    let api = fixture.engine.api("solo").unwrap();
    assert_eq!(*api.downcast::<String>().unwrap(), "solo");

    fixture.engine.deactivate("initialized").unwrap();
    assert!(fixture.engine.api("solo").is_none());
}

#[tokio::test]
async fn test_activation_failure_is_attributed() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let loader = Arc::new(LocalLoader::new());
    loader.register(
        "broken",
        Arc::new(Recorder {
            name: "broken".to_string(),
            log: log.clone(),
            fail_activation: true,
        }),
    );
    let fixture = setup(vec![manifest("broken")], initialized_only(), loader, true);

    let err = fixture
        .engine
        .activate("initialized", None, false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("broken failed to activate"));
    assert!(err.to_string().contains("boom"));
    assert!(!fixture.engine.is_activated("broken"));
}

#[tokio::test]
async fn test_cyclic_dependency_is_fatal_even_in_permissive_mode() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let loader = Arc::new(LocalLoader::new());
    for name in ["a", "b"] {
        Recorder::install(&loader, name, &log);
    }
    let fixture = setup(
        vec![
            manifest("a").with_dependency("b", "*"),
            manifest("b").with_dependency("a", "*"),
        ],
        initialized_only(),
        loader,
        false,
    );

    let err = fixture
        .engine
        .activate("initialized", None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, KernelError::CyclicDependency(_)));
}

#[tokio::test]
async fn test_lifecycle_events_emitted_in_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let loader = Arc::new(LocalLoader::new());
    Recorder::install(&loader, "solo", &log);
    let fixture = setup(vec![manifest("solo")], initialized_only(), loader, true);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    fixture.event_bus.subscribe(move |event| {
        let label = match event {
            KernelEvent::BeforeActivate { extension } => format!("before:{extension}"),
            KernelEvent::Activated { extension } => format!("active:{extension}"),
            KernelEvent::BeforeDeactivate { extension } => format!("closing:{extension}"),
            KernelEvent::Deactivated { extension } => format!("closed:{extension}"),
            _ => return,
        };
        sink.lock().push(label);
    });

    fixture.engine.activate("initialized", None, false).await.unwrap();
    fixture.engine.deactivate("initialized").unwrap();

    assert_eq!(
        seen.lock().clone(),
        vec![
            "before:solo".to_string(),
            "active:solo".to_string(),
            "closing:solo".to_string(),
            "closed:solo".to_string(),
        ]
    );
}
