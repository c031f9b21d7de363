use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use trellis::container::ManagedContainerBuilder;
use trellis::context::{ContextGuard, ResolutionContext, current_context};
use trellis::dispatcher::ContainerEventKind;
use trellis::handlers::HandlerRegistry;
use trellis::lifecycle::{LifecycleInterceptor, LifecycleManager, TransitionOutcome};
use trellis::module::{Module, ModuleId, ModuleState};
use trellis::resolver::DescriptorPathSet;
use trellis::ManagerConfig;
use trellis_testing::{FailMode, FakeModule, RecordingBuilder, init_tracing, wait_until_blocking};

fn config() -> ManagerConfig {
    ManagerConfig {
        pool_size: 2,
        shutdown_timeout_ms: 2_000,
        ..Default::default()
    }
}

fn manager(builder: &RecordingBuilder) -> LifecycleManager {
    init_tracing();
    LifecycleManager::new(Arc::new(builder.clone()), config()).unwrap()
}

fn with_descriptors(id: u64) -> Arc<dyn Module> {
    FakeModule::new(id, format!("module.{}", id))
        .with_entry("OSGI-INF/blueprint/context.xml")
        .into_arc()
}

#[test]
fn test_header_takes_precedence_over_scan() {
    let builder = RecordingBuilder::new();
    let manager = manager(&builder);
    let module = Arc::new(
        FakeModule::new(1, "with.header")
            .with_header("Bundle-Blueprint", " config/a.xml , ,config/b.xml ")
            .with_entry("OSGI-INF/blueprint/ignored.xml"),
    );
    let handle: Arc<dyn Module> = module.clone();

    let outcome = manager.on_module_activating(&handle);

    assert_eq!(outcome, TransitionOutcome::Registered { paths: 2 });
    assert_eq!(builder.builds()[0].paths, vec!["config/a.xml", "config/b.xml"]);
    assert_eq!(module.scans(), 0);
}

#[test]
fn test_directory_scan_fallback() {
    let builder = RecordingBuilder::new();
    let manager = manager(&builder);
    let module = FakeModule::new(2, "scanned")
        .with_entry("OSGI-INF/blueprint/a.xml")
        .with_entry("OSGI-INF/blueprint/readme.txt")
        .with_entry("OSGI-INF/blueprint/nested/b.xml")
        .with_entry("OSGI-INF/blueprint/c.xml")
        .with_entry_prefix("bundle://2/")
        .into_arc();

    let outcome = manager.on_module_activating(&module);

    assert_eq!(outcome, TransitionOutcome::Registered { paths: 2 });
    assert_eq!(
        builder.builds()[0].paths,
        vec!["OSGI-INF/blueprint/a.xml", "OSGI-INF/blueprint/c.xml"]
    );
}

#[test]
fn test_configured_pattern_with_character_class() {
    init_tracing();
    let builder = RecordingBuilder::new();
    let manager = LifecycleManager::new(
        Arc::new(builder.clone()),
        ManagerConfig {
            descriptor_pattern: "[ab].xml".to_string(),
            ..config()
        },
    )
    .unwrap();
    let module = FakeModule::new(40, "classes")
        .with_entry("OSGI-INF/blueprint/a.xml")
        .with_entry("OSGI-INF/blueprint/b.xml")
        .with_entry("OSGI-INF/blueprint/c.xml")
        .into_arc();

    assert_eq!(
        manager.on_module_activating(&module),
        TransitionOutcome::Registered { paths: 2 }
    );
    assert_eq!(
        builder.builds()[0].paths,
        vec!["OSGI-INF/blueprint/a.xml", "OSGI-INF/blueprint/b.xml"]
    );
}

#[test]
fn test_invalid_pattern_fails_construction() {
    let config = ManagerConfig {
        descriptor_pattern: "[a".to_string(),
        ..config()
    };
    assert!(LifecycleManager::new(Arc::new(RecordingBuilder::new()), config).is_err());
}

#[test]
fn test_no_descriptors_builds_nothing() {
    let builder = RecordingBuilder::new();
    let manager = manager(&builder);
    let module = FakeModule::new(3, "plain")
        .with_entry("lib/util.jar")
        .into_arc();

    assert_eq!(manager.on_module_activating(&module), TransitionOutcome::NoDescriptors);
    assert_eq!(builder.build_count(), 0);
    assert!(!manager.is_registered(ModuleId(3)));
}

#[test]
fn test_blank_header_does_not_fall_back_to_scan() {
    let builder = RecordingBuilder::new();
    let manager = manager(&builder);
    let module = Arc::new(
        FakeModule::new(4, "blank.header")
            .with_header("Bundle-Blueprint", " , ")
            .with_entry("OSGI-INF/blueprint/a.xml"),
    );
    let handle: Arc<dyn Module> = module.clone();

    assert_eq!(manager.on_module_activating(&handle), TransitionOutcome::NoDescriptors);
    assert_eq!(module.scans(), 0);
    assert_eq!(builder.build_count(), 0);
}

#[test]
fn test_enumeration_failure_is_treated_as_no_descriptors() {
    let builder = RecordingBuilder::new();
    let manager = manager(&builder);
    let module = FakeModule::new(5, "broken")
        .failing_enumeration()
        .into_arc();

    assert_eq!(manager.on_module_activating(&module), TransitionOutcome::NoDescriptors);
    assert_eq!(builder.build_count(), 0);
}

#[test]
fn test_activate_then_deactivate() {
    let builder = RecordingBuilder::new();
    let manager = manager(&builder);
    let module = with_descriptors(6);

    assert!(matches!(
        manager.on_transition(&module, ModuleState::Starting),
        TransitionOutcome::Registered { .. }
    ));
    assert!(manager.is_registered(ModuleId(6)));
    assert_eq!(builder.handles()[0].scheduled(), 1);

    assert_eq!(
        manager.on_transition(&module, ModuleState::Stopping),
        TransitionOutcome::Destroyed
    );
    assert!(!manager.is_registered(ModuleId(6)));
    assert_eq!(builder.handles()[0].destroyed(), 1);
}

#[test]
fn test_other_states_are_ignored() {
    let builder = RecordingBuilder::new();
    let manager = manager(&builder);
    let module = with_descriptors(7);

    for state in [
        ModuleState::Installed,
        ModuleState::Active,
        ModuleState::Uninstalled,
    ] {
        assert_eq!(manager.on_transition(&module, state), TransitionOutcome::Ignored);
    }
    assert_eq!(builder.build_count(), 0);
}

#[test]
fn test_second_activation_keeps_first_container() {
    let builder = RecordingBuilder::new();
    let manager = manager(&builder);
    let module = with_descriptors(8);

    manager.on_module_activating(&module);
    assert_eq!(
        manager.on_module_activating(&module),
        TransitionOutcome::AlreadyRegistered
    );

    assert_eq!(builder.builds_for(ModuleId(8)), 1);
    assert_eq!(manager.container_count(), 1);
    assert_eq!(builder.handles()[0].destroyed(), 0);
}

#[test]
fn test_deactivating_unknown_module_is_a_noop() {
    let builder = RecordingBuilder::new();
    let manager = manager(&builder);
    let module = with_descriptors(9);

    assert_eq!(
        manager.on_module_deactivating(&module),
        TransitionOutcome::UnknownModule
    );
    manager.on_module_activating(&module);
    manager.on_module_deactivating(&module);
    assert_eq!(
        manager.on_module_deactivating(&module),
        TransitionOutcome::UnknownModule
    );
    assert_eq!(builder.total_destroyed(), 1);
}

#[test]
fn test_deactivating_module_without_container_is_expected() {
    let builder = RecordingBuilder::new();
    builder.fail(ModuleId(31), FailMode::BuildError);
    let manager = manager(&builder);
    let plain = FakeModule::new(30, "plain").into_arc();
    let broken = with_descriptors(31);

    assert_eq!(manager.on_module_activating(&plain), TransitionOutcome::NoDescriptors);
    assert_eq!(manager.on_module_activating(&broken), TransitionOutcome::BuildFailed);

    assert_eq!(manager.on_module_deactivating(&plain), TransitionOutcome::NotRegistered);
    assert_eq!(manager.on_module_deactivating(&broken), TransitionOutcome::NotRegistered);

    // only the first stop after an empty activation is expected
    assert_eq!(manager.on_module_deactivating(&plain), TransitionOutcome::UnknownModule);
}

#[test]
fn test_reactivation_builds_fresh_container() {
    let builder = RecordingBuilder::new();
    let manager = manager(&builder);
    let module = with_descriptors(10);

    manager.on_module_activating(&module);
    manager.on_module_deactivating(&module);
    assert!(matches!(
        manager.on_module_activating(&module),
        TransitionOutcome::Registered { .. }
    ));

    let handles = builder.handles_for(ModuleId(10));
    assert_eq!(handles.len(), 2);
    assert_eq!(handles[0].destroyed(), 1);
    assert_eq!(handles[1].destroyed(), 0);
}

#[test]
fn test_build_failure_leaves_nothing_registered() {
    let builder = RecordingBuilder::new();
    builder.fail(ModuleId(11), FailMode::BuildError);
    let manager = manager(&builder);

    assert_eq!(
        manager.on_module_activating(&with_descriptors(11)),
        TransitionOutcome::BuildFailed
    );
    assert!(!manager.is_registered(ModuleId(11)));

    // the manager keeps serving other modules
    assert!(matches!(
        manager.on_module_activating(&with_descriptors(12)),
        TransitionOutcome::Registered { .. }
    ));
}

#[test]
fn test_build_runs_in_manager_context() {
    let builder = RecordingBuilder::new();
    let manager = LifecycleManager::new(
        Arc::new(builder.clone()),
        ManagerConfig {
            context_name: "container-scope".to_string(),
            ..config()
        },
    )
    .unwrap();

    let outer = ResolutionContext::new("caller");
    let _guard = ContextGuard::enter(&outer);

    manager.on_module_activating(&with_descriptors(13));

    assert_eq!(builder.builds()[0].context.as_deref(), Some("container-scope"));
    assert!(current_context().is_some_and(|c| c.ptr_eq(&outer)));
}

#[test]
fn test_context_restored_after_build_error_and_panic() {
    let builder = RecordingBuilder::new();
    builder.fail(ModuleId(14), FailMode::BuildError);
    builder.fail(ModuleId(15), FailMode::BuildPanic);
    let manager = manager(&builder);

    assert!(current_context().is_none());
    assert_eq!(
        manager.on_module_activating(&with_descriptors(14)),
        TransitionOutcome::BuildFailed
    );
    assert!(current_context().is_none());

    let caller = ResolutionContext::new("caller");
    let _guard = ContextGuard::enter(&caller);

    assert_eq!(
        manager.on_module_activating(&with_descriptors(14)),
        TransitionOutcome::BuildFailed
    );
    assert!(current_context().is_some_and(|c| c.ptr_eq(&caller)));

    assert_eq!(
        manager.on_module_activating(&with_descriptors(15)),
        TransitionOutcome::BuildFailed
    );
    assert!(current_context().is_some_and(|c| c.ptr_eq(&caller)));
    assert!(builder
        .builds()
        .iter()
        .all(|b| b.context.as_deref() == Some("trellis")));
    assert_eq!(manager.container_count(), 0);
}

#[test]
fn test_schedule_failure_removes_and_destroys() {
    let builder = RecordingBuilder::new();
    builder.fail(ModuleId(16), FailMode::ScheduleError);
    let manager = manager(&builder);

    assert_eq!(
        manager.on_module_activating(&with_descriptors(16)),
        TransitionOutcome::ScheduleFailed
    );
    assert!(!manager.is_registered(ModuleId(16)));
    assert_eq!(builder.handles()[0].destroyed(), 1);
}

#[test]
fn test_destroy_failure_still_unregisters() {
    let builder = RecordingBuilder::new();
    builder.fail(ModuleId(17), FailMode::DestroyError);
    builder.fail(ModuleId(18), FailMode::DestroyPanic);
    let manager = manager(&builder);

    for id in [17, 18] {
        let module = with_descriptors(id);
        manager.on_module_activating(&module);
        assert_eq!(
            manager.on_module_deactivating(&module),
            TransitionOutcome::DestroyFailed
        );
        assert!(!manager.is_registered(ModuleId(id)));
    }
}

#[test]
fn test_builders_share_one_handler_registry() {
    let builder = RecordingBuilder::new();
    let manager = manager(&builder);

    for id in 20..24 {
        manager.on_module_activating(&with_descriptors(id));
    }

    let shared: &Arc<HandlerRegistry> = manager.handlers();
    assert!(builder
        .builds()
        .iter()
        .all(|b| Arc::ptr_eq(&b.handlers, shared)));
}

#[test]
fn test_concurrent_activation_of_distinct_modules() {
    let builder = RecordingBuilder::new();
    let manager = Arc::new(manager(&builder));
    let barrier = Arc::new(Barrier::new(16));

    let workers: Vec<_> = (100..116)
        .map(|id| {
            let manager = Arc::clone(&manager);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let module = with_descriptors(id);
                barrier.wait();
                manager.on_module_activating(&module)
            })
        })
        .collect();

    for worker in workers {
        assert!(matches!(
            worker.join().unwrap(),
            TransitionOutcome::Registered { .. }
        ));
    }
    assert_eq!(manager.container_count(), 16);
    assert_eq!(builder.build_count(), 16);
}

#[test]
fn test_concurrent_activation_of_same_module_registers_once() {
    let builder = RecordingBuilder::new().with_delay(Duration::from_millis(20));
    let manager = Arc::new(manager(&builder));
    let module = with_descriptors(200);
    let barrier = Arc::new(Barrier::new(8));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let module = Arc::clone(&module);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                manager.on_module_activating(&module)
            })
        })
        .collect();

    let outcomes: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    let registered = outcomes
        .iter()
        .filter(|o| matches!(o, TransitionOutcome::Registered { .. }))
        .count();

    assert_eq!(registered, 1);
    assert_eq!(manager.container_count(), 1);
    // every container that lost the race was destroyed, the winner was not
    let live: Vec<_> = builder
        .handles()
        .into_iter()
        .filter(|h| h.destroyed() == 0)
        .collect();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].scheduled(), 1);
}

#[test]
fn test_shutdown_destroys_each_container_once() {
    let builder = RecordingBuilder::new();
    let manager = manager(&builder);
    for id in 300..305 {
        manager.on_module_activating(&with_descriptors(id));
    }

    let report = manager.shutdown();

    assert_eq!(report.destroyed, 5);
    assert_eq!(report.failed, 0);
    assert!(report.pool_drained);
    assert_eq!(manager.container_count(), 0);
    assert!(builder.handles().iter().all(|h| h.destroyed() == 1));
    assert!(manager.executor().is_closed());
    assert!(manager.dispatcher().is_closed());

    // repeated shutdown and late transitions touch nothing
    assert_eq!(manager.shutdown().destroyed, 0);
    let module = with_descriptors(300);
    assert_eq!(manager.on_module_deactivating(&module), TransitionOutcome::Stopped);
    assert_eq!(manager.on_module_activating(&module), TransitionOutcome::Stopped);
    assert_eq!(builder.total_destroyed(), 5);
    assert_eq!(builder.build_count(), 5);
}

#[test]
fn test_shutdown_during_build_destroys_late_container() {
    let builder = RecordingBuilder::new().with_delay(Duration::from_millis(200));
    let manager = Arc::new(manager(&builder));

    let activating = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || manager.on_module_activating(&with_descriptors(350)))
    };
    assert!(wait_until_blocking(Duration::from_secs(5), || builder.build_count() == 1));

    let report = manager.shutdown();
    assert_eq!(report.destroyed, 0);

    assert_eq!(activating.join().unwrap(), TransitionOutcome::Stopped);
    let handles = builder.handles_for(ModuleId(350));
    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].destroyed(), 1);
    assert_eq!(handles[0].scheduled(), 0);
    assert_eq!(manager.container_count(), 0);
}

#[test]
fn test_shutdown_continues_past_failing_destroy() {
    let builder = RecordingBuilder::new();
    builder.fail(ModuleId(401), FailMode::DestroyPanic);
    let manager = manager(&builder);
    for id in 400..403 {
        manager.on_module_activating(&with_descriptors(id));
    }

    let report = manager.shutdown();

    assert_eq!(report.destroyed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(builder.total_destroyed(), 3);
}

#[test]
fn test_drop_shuts_down() {
    let builder = RecordingBuilder::new();
    {
        let manager = manager(&builder);
        manager.on_module_activating(&with_descriptors(500));
    }
    assert_eq!(builder.handles()[0].destroyed(), 1);
}

#[test]
fn test_interceptor_reports_success_even_on_failure() {
    let builder = RecordingBuilder::new();
    builder.fail(ModuleId(600), FailMode::BuildError);
    let manager = manager(&builder);

    assert_eq!(manager.name(), trellis::lifecycle::INTERCEPTOR_NAME);
    assert!(manager
        .invoke(ModuleState::Starting, &with_descriptors(600))
        .is_ok());
}

#[test]
fn test_managed_container_lifecycle_events() {
    init_tracing();
    let builder = ManagedContainerBuilder::new(
        |_: &dyn Module, paths: &DescriptorPathSet, _: &HandlerRegistry| -> anyhow::Result<()> {
            anyhow::ensure!(!paths.is_empty(), "no descriptors");
            Ok(())
        },
    );
    let manager = LifecycleManager::new(Arc::new(builder), config()).unwrap();
    let module = with_descriptors(700);
    let id = module.id();

    manager.on_module_activating(&module);
    assert!(wait_until_blocking(Duration::from_secs(5), || {
        manager
            .dispatcher()
            .last_event(id)
            .is_some_and(|e| e.kind == ContainerEventKind::Created)
    }));

    let mut events = manager.dispatcher().subscribe();
    assert_eq!(manager.on_module_deactivating(&module), TransitionOutcome::Destroyed);
    assert!(wait_until_blocking(Duration::from_secs(5), || {
        matches!(events.try_recv(), Ok(e) if e.kind == ContainerEventKind::Destroyed)
    }));
    assert!(manager.dispatcher().last_event(id).is_none());
}

#[test]
fn test_destroyed_containers_leave_no_event_state() {
    init_tracing();
    let builder = ManagedContainerBuilder::new(
        |_: &dyn Module, _: &DescriptorPathSet, _: &HandlerRegistry| -> anyhow::Result<()> { Ok(()) },
    );
    let manager = LifecycleManager::new(
        Arc::new(builder),
        ManagerConfig {
            event_capacity: 2_048,
            ..config()
        },
    )
    .unwrap();
    let modules: Vec<_> = (1_000..1_200).map(with_descriptors).collect();

    for module in &modules {
        manager.on_module_activating(module);
    }
    assert!(wait_until_blocking(Duration::from_secs(10), || {
        modules.iter().all(|m| {
            manager
                .dispatcher()
                .last_event(m.id())
                .is_some_and(|e| e.kind == ContainerEventKind::Created)
        })
    }));

    let mut events = manager.dispatcher().subscribe();
    for module in &modules {
        assert_eq!(manager.on_module_deactivating(module), TransitionOutcome::Destroyed);
    }
    let mut destroyed = 0;
    assert!(wait_until_blocking(Duration::from_secs(10), || {
        while let Ok(event) = events.try_recv() {
            if event.kind == ContainerEventKind::Destroyed {
                destroyed += 1;
            }
        }
        destroyed == modules.len()
    }));

    assert_eq!(manager.container_count(), 0);
    assert!(modules
        .iter()
        .all(|m| manager.dispatcher().last_event(m.id()).is_none()));
}
