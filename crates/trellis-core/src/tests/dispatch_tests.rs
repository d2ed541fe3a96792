use super::*;
use crate::testing::RenderTestRule;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

type Log = Rc<RefCell<Vec<String>>>;

fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

fn record(log: &Log, entry: impl Into<String>) {
    log.borrow_mut().push(entry.into());
}

fn drain(log: &Log) -> Vec<String> {
    std::mem::take(&mut *log.borrow_mut())
}

/// Registers a layout and a passive effect that log their runs and
/// cleanups under `name`.
fn track(scope: &mut Scope<'_>, log: &Log, name: &str) -> Result<(), Error> {
    let (layout_log, layout_name) = (Rc::clone(log), name.to_owned());
    scope.use_layout_effect(Deps::once(), move |_| {
        record(&layout_log, format!("layout {layout_name}"));
        Ok(Cleanup::new(move || {
            record(&layout_log, format!("layout cleanup {layout_name}"))
        }))
    })?;
    let (passive_log, passive_name) = (Rc::clone(log), name.to_owned());
    scope.use_effect(Deps::once(), move |_| {
        record(&passive_log, format!("effect {passive_name}"));
        Ok(Cleanup::new(move || {
            record(&passive_log, format!("effect cleanup {passive_name}"))
        }))
    })
}

#[test]
fn updates_during_render_are_coalesced() {
    let renders = Rc::new(Cell::new(0));
    let counted = Rc::clone(&renders);
    let view = define("Normalizer", move |scope, _: &()| {
        counted.set(counted.get() + 1);
        let (value, set_value) = scope.use_state(|| 3)?;
        if value % 2 == 1 {
            set_value.set(value + 1)?;
        }
        Ok(text(value.to_string()))
    });
    let mut rule = RenderTestRule::new();

    rule.set_content(view.create(())).unwrap();

    assert_eq!(renders.get(), 2);
    assert_eq!(rule.text(), "4");
    let ops = rule.take_ops();
    assert!(ops
        .iter()
        .any(|op| matches!(op, HostOp::CreateText { value, .. } if value == "4")));
    assert!(ops.iter().all(|op| !matches!(op, HostOp::SetText { .. })));
    assert!(!ops
        .iter()
        .any(|op| matches!(op, HostOp::CreateText { value, .. } if value == "3")));
}

#[test]
fn endless_self_updates_fail_with_render_loop() {
    let view = define("Runaway", |scope, _: &()| {
        let (value, set_value) = scope.use_state(|| 0u32)?;
        set_value.set(value + 1)?;
        Ok(text(value.to_string()))
    });
    let mut rule = RenderTestRule::with_config(RuntimeConfig::default().with_max_render_passes(5));

    let err = rule.set_content(view.create(())).unwrap_err();

    match err {
        Error::RenderLoop { component, passes } => {
            assert_eq!(component, "Runaway");
            assert_eq!(passes, 5);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(rule.root_node().is_none());
}

#[test]
fn descendant_updating_an_ancestor_settles_before_returning() {
    let parent_renders = Rc::new(Cell::new(0));
    let counted = Rc::clone(&parent_renders);
    let child = define("Child", |_, props: &(u32, Setter<u32>)| {
        let (value, setter) = props;
        if *value < 2 {
            setter.set(2)?;
        }
        Ok(text(value.to_string()))
    });
    let parent = define("Parent", move |scope, _: &()| {
        counted.set(counted.get() + 1);
        let (value, set_value) = scope.use_state(|| 0u32)?;
        Ok(element("div").child(child.create((value, set_value))).into())
    });
    let mut rule = RenderTestRule::new();

    rule.set_content(parent.create(())).unwrap();

    assert_eq!(rule.text(), "2");
    assert_eq!(parent_renders.get(), 2);
}

#[test]
fn layout_effect_updates_are_rendered_synchronously() {
    let view = define("Measure", |scope, _: &()| {
        let (width, set_width) = scope.use_state(|| 0u32)?;
        scope.use_layout_effect(Deps::once(), move |fx| {
            if fx.host_node().is_some() {
                set_width.set(120)?;
            }
            Ok(Cleanup::none())
        })?;
        Ok(text(format!("width {width}")))
    });
    let mut rule = RenderTestRule::new();

    rule.set_content(view.create(())).unwrap();

    assert_eq!(rule.text(), "width 120");
    assert_eq!(rule.tick_requests(), 0);
}

#[test]
fn layout_effects_run_children_first_and_passive_effects_wait_for_a_tick() {
    let log = new_log();
    let leaf_log = Rc::clone(&log);
    let leaf = define("Leaf", move |scope, name: &&'static str| {
        track(scope, &leaf_log, name)?;
        Ok(text(*name))
    });
    let branch_log = Rc::clone(&log);
    let branch = define("Branch", move |scope, _: &()| {
        track(scope, &branch_log, "branch")?;
        Ok(element("div")
            .child(leaf.create("a"))
            .child(leaf.create("b"))
            .into())
    });
    let mut rule = RenderTestRule::new();

    rule.set_content(branch.create(())).unwrap();

    assert_eq!(drain(&log), ["layout a", "layout b", "layout branch"]);
    assert_eq!(rule.tick_requests(), 1);
    assert!(rule.runtime().has_deferred_work());

    rule.flush_effects().unwrap();

    assert_eq!(drain(&log), ["effect branch", "effect a", "effect b"]);
    assert!(!rule.runtime().has_deferred_work());
}

#[test]
fn effects_rerun_when_deps_change_after_cleaning_up() {
    let log = new_log();
    let sink = Rc::clone(&log);
    let subscriber = define("Subscriber", move |scope, topic: &String| {
        let (sink, topic) = (Rc::clone(&sink), topic.clone());
        scope.use_effect(Deps::on(topic.clone()), move |_| {
            record(&sink, format!("subscribe {topic}"));
            Ok(Cleanup::new(move || record(&sink, format!("unsubscribe {topic}"))))
        })?;
        Ok(nothing())
    });
    let mut rule = RenderTestRule::new();

    rule.set_content(subscriber.create("a".into())).unwrap();
    rule.flush_effects().unwrap();
    assert_eq!(drain(&log), ["subscribe a"]);

    rule.set_content(subscriber.create("a".into()).force_update()).unwrap();
    rule.flush_effects().unwrap();
    assert!(drain(&log).is_empty());

    rule.set_content(subscriber.create("b".into())).unwrap();
    assert!(drain(&log).is_empty());
    rule.flush_effects().unwrap();
    assert_eq!(drain(&log), ["unsubscribe a", "subscribe b"]);

    rule.unmount().unwrap();
    assert_eq!(drain(&log), ["unsubscribe b"]);
}

#[test]
fn effects_without_deps_run_after_every_commit() {
    let runs = Rc::new(Cell::new(0));
    let counted = Rc::clone(&runs);
    let view = define("Chatty", move |scope, value: &u8| {
        let counted = Rc::clone(&counted);
        scope.use_layout_effect(Deps::always(), move |_| {
            counted.set(counted.get() + 1);
            Ok(Cleanup::none())
        })?;
        Ok(text(value.to_string()))
    });
    let mut rule = RenderTestRule::new();

    rule.set_content(view.create(1)).unwrap();
    rule.set_content(view.create(2)).unwrap();
    rule.set_content(view.create(2)).unwrap();

    assert_eq!(runs.get(), 2);
}

#[test]
fn unmount_tears_down_children_before_parents() {
    let log = new_log();
    let child_log = Rc::clone(&log);
    let child = define("Child", move |scope, _: &()| {
        track(scope, &child_log, "child")?;
        Ok(text("child"))
    });
    let parent_log = Rc::clone(&log);
    let parent = define("Parent", move |scope, _: &()| {
        track(scope, &parent_log, "parent")?;
        Ok(element("div").child(child.create(())).into())
    });
    let mut rule = RenderTestRule::new();
    rule.set_content(parent.create(())).unwrap();
    rule.flush_effects().unwrap();
    drain(&log);

    rule.unmount().unwrap();

    assert_eq!(
        drain(&log),
        [
            "layout cleanup child",
            "effect cleanup child",
            "layout cleanup parent",
            "effect cleanup parent",
        ]
    );
    assert!(rule.host().children(rule.container()).is_empty());
}

#[test]
fn passive_effects_of_an_unmounted_instance_never_run() {
    let log = new_log();
    let sink = Rc::clone(&log);
    let view = define("Brief", move |scope, _: &()| {
        track(scope, &sink, "brief")?;
        Ok(nothing())
    });
    let mut rule = RenderTestRule::new();
    rule.set_content(view.create(())).unwrap();
    drain(&log);

    rule.unmount().unwrap();
    rule.flush_effects().unwrap();

    assert_eq!(drain(&log), ["layout cleanup brief"]);
}

#[test]
fn state_set_in_a_passive_effect_renders_in_the_same_flush() {
    let view = define("Loader", |scope, _: &()| {
        let (status, set_status) = scope.use_state(|| "loading")?;
        scope.use_effect(Deps::once(), move |_| {
            set_status.set("loaded")?;
            Ok(Cleanup::none())
        })?;
        Ok(text(status))
    });
    let mut rule = RenderTestRule::new();
    rule.set_content(view.create(())).unwrap();
    assert_eq!(rule.text(), "loading");

    rule.flush_effects().unwrap();

    assert_eq!(rule.text(), "loaded");
    assert!(!rule.runtime().has_deferred_work());
}

#[test]
fn instance_handles_dispatch_and_force_renders() {
    let external = Rc::new(Cell::new(0));
    let handles: Rc<RefCell<Option<InstanceHandle>>> = Rc::new(RefCell::new(None));
    let (source, sink) = (Rc::clone(&external), Rc::clone(&handles));
    let view = define("External", move |scope, _: &()| {
        *sink.borrow_mut() = Some(scope.handle());
        Ok(text(source.get().to_string()))
    });
    let mut rule = RenderTestRule::new();
    rule.set_content(view.create(())).unwrap();
    let handle = handles.borrow().clone().unwrap();
    assert!(handle.is_mounted());
    assert_eq!(handle.host_node(), rule.root_node());

    external.set(7);
    handle.force_update().unwrap();
    assert_eq!(rule.text(), "7");

    let bump = Rc::clone(&external);
    handle
        .dispatch(move || {
            bump.set(bump.get() + 1);
            Ok(())
        })
        .unwrap();
    assert_eq!(rule.text(), "8");

    rule.unmount().unwrap();
    assert!(!handle.is_mounted());
    assert!(handle.force_update().is_ok());
}

#[test]
fn deferred_tasks_run_on_the_next_flush() {
    let ran = Rc::new(Cell::new(false));
    let mut rule = RenderTestRule::new();
    let flag = Rc::clone(&ran);

    rule.runtime().schedule_deferred(move || flag.set(true));
    assert!(!ran.get());
    assert!(rule.tick_requests() > 0);

    rule.pump_until_idle().unwrap();
    assert!(ran.get());
}

#[test]
fn effect_scope_sees_the_host_node_and_builds_cleanups() {
    let log = new_log();
    let sink = Rc::clone(&log);
    let view = define("Canvas", move |scope, _: &()| {
        let sink = Rc::clone(&sink);
        scope.use_layout_effect(Deps::once(), move |fx| {
            record(&sink, format!("attached {}", fx.host_node().is_some()));
            Ok(fx.on_cleanup(move || record(&sink, "detached")))
        })?;
        Ok(element("canvas").into())
    });
    let mut rule = RenderTestRule::new();

    rule.set_content(view.create(())).unwrap();
    assert_eq!(drain(&log), ["attached true"]);

    rule.unmount().unwrap();
    assert_eq!(drain(&log), ["detached"]);
}

#[test]
fn runtime_handle_is_inert_once_the_runtime_is_gone() {
    let handle = {
        let rule = RenderTestRule::new();
        let handle = rule.runtime().handle();
        assert!(handle.is_alive());
        handle
    };

    assert!(!handle.is_alive());
    handle.schedule_deferred(|| panic!("ran after the runtime was dropped"));
    assert!(handle.run_deferred().is_ok());
    assert!(!handle.has_deferred_work());
}

#[test]
fn instance_ids_are_numbered_per_runtime() {
    let seen: Rc<RefCell<Vec<InstanceHandle>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let numbered = define("Numbered", move |scope, _: &()| {
        sink.borrow_mut().push(scope.handle());
        Ok(nothing())
    });
    let mut first = RenderTestRule::new();
    let mut second = RenderTestRule::new();

    first
        .set_content(
            element("div")
                .child(numbered.create(()))
                .child(numbered.create(())),
        )
        .unwrap();
    second.set_content(numbered.create(())).unwrap();

    let ids: Vec<_> = seen.borrow().iter().map(InstanceHandle::id).collect();
    assert_eq!(ids, vec![Some(1), Some(2), Some(1)]);
}
