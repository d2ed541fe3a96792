use super::*;
use crate::testing::RenderTestRule;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

fn broken() -> ComponentFactory<()> {
    define("Broken", |_, _: &()| Err(anyhow::anyhow!("no data")))
}

fn caught(err: &Error) -> Node {
    element("p")
        .attr("class", "error")
        .child(text(format!("caught: {err}")))
        .into()
}

#[test]
fn ancestor_handler_replaces_the_failing_subtree() {
    let broken = broken();
    let panel = define("Panel", move |scope, _: &()| {
        scope.use_error_handler(caught)?;
        Ok(element("div")
            .child(element("span").child("ok"))
            .child(broken.create(()))
            .into())
    });
    let mut rule = RenderTestRule::new();

    rule.set_content(panel.create(())).unwrap();

    assert_eq!(rule.text(), "okcaught: view of `Broken` failed: no data");
    let div = rule.root_node().unwrap();
    let error = rule.find("class", "error").unwrap();
    assert_eq!(rule.host().children(div)[1], error);
}

#[test]
fn nearest_handler_wins() {
    let broken = broken();
    let inner = define("Inner", move |scope, _: &()| {
        scope.use_error_handler(|_| text("inner"))?;
        Ok(element("section").child(broken.create(())).into())
    });
    let outer = define("Outer", move |scope, _: &()| {
        scope.use_error_handler(|_| text("outer"))?;
        Ok(element("main").child(inner.create(())).into())
    });
    let mut rule = RenderTestRule::new();

    rule.set_content(outer.create(())).unwrap();

    assert_eq!(rule.text(), "inner");
}

#[test]
fn component_recovers_with_its_own_handler_and_renders_again() {
    let fragile = define("Fragile", |scope, value: &i32| {
        scope.use_error_handler(|_| text("recovered"))?;
        if *value < 0 {
            anyhow::bail!("negative input {value}");
        }
        Ok(text(value.to_string()))
    });
    let mut rule = RenderTestRule::new();
    rule.set_content(fragile.create(1)).unwrap();
    let first = rule.root_node().unwrap();

    rule.set_content(fragile.create(-1)).unwrap();
    assert_eq!(rule.text(), "recovered");
    let fallback = rule.root_node().unwrap();
    assert_ne!(first, fallback);
    assert!(rule.take_ops().contains(&HostOp::ReplaceChild {
        parent: rule.container(),
        new_child: fallback,
        old_child: first,
    }));

    rule.set_content(fragile.create(2)).unwrap();
    assert_eq!(rule.text(), "2");
}

#[test]
fn unhandled_render_error_reaches_the_caller() {
    let mut rule = RenderTestRule::new();

    let err = rule.set_content(broken().create(())).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Render);
    assert_eq!(err.to_string(), "view of `Broken` failed: no data");
    assert!(rule.root_node().is_none());
}

#[test]
fn failing_passive_effect_is_handled_on_flush() {
    let widget = define("Widget", |scope, _: &()| {
        scope.use_effect(Deps::once(), |_| Err(anyhow::anyhow!("effect exploded")))?;
        Ok(text("widget"))
    });
    let shell = define("Shell", move |scope, _: &()| {
        scope.use_error_handler(caught)?;
        Ok(element("div").child(widget.create(())).into())
    });
    let mut rule = RenderTestRule::new();
    rule.set_content(shell.create(())).unwrap();
    assert_eq!(rule.text(), "widget");

    rule.flush_effects().unwrap();

    assert_eq!(
        rule.text(),
        "caught: effect in `Widget` failed: effect exploded"
    );
}

#[test]
fn failing_layout_effect_is_handled_during_mount() {
    let widget = define("Widget", |scope, _: &()| {
        scope.use_layout_effect(Deps::once(), |_| Err(anyhow::anyhow!("no size")))?;
        Ok(text("widget"))
    });
    let shell = define("Shell", move |scope, _: &()| {
        scope.use_error_handler(|err| text(format!("{}", err.kind() == ErrorKind::Effect)))?;
        Ok(element("div").child(widget.create(())).into())
    });
    let mut rule = RenderTestRule::new();

    rule.set_content(shell.create(())).unwrap();

    assert_eq!(rule.text(), "true");
}

#[test]
fn unhandled_effect_error_is_returned_from_flush() {
    let widget = define("Widget", |scope, _: &()| {
        scope.use_effect(Deps::once(), |_| Err(anyhow::anyhow!("effect exploded")))?;
        Ok(nothing())
    });
    let mut rule = RenderTestRule::new();
    rule.set_content(widget.create(())).unwrap();

    let err = rule.flush_effects().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Effect);
}

#[test]
fn cleanup_errors_are_logged_and_swallowed() {
    let handled = Rc::new(Cell::new(0));
    let runs = Rc::new(RefCell::new(Vec::<u8>::new()));
    let (counter, sink) = (Rc::clone(&handled), Rc::clone(&runs));
    let noisy = define("Noisy", move |scope, value: &u8| {
        let counter = Rc::clone(&counter);
        scope.use_error_handler(move |_| {
            counter.set(counter.get() + 1);
            nothing()
        })?;
        let (sink, value) = (Rc::clone(&sink), *value);
        scope.use_layout_effect(Deps::on(value), move |_| {
            sink.borrow_mut().push(value);
            Ok(Cleanup::fallible(|| Err(anyhow::anyhow!("cleanup failed"))))
        })?;
        Ok(text(value.to_string()))
    });
    let mut rule = RenderTestRule::new();
    rule.set_content(noisy.create(1)).unwrap();

    rule.set_content(noisy.create(2)).unwrap();
    rule.unmount().unwrap();

    assert_eq!(*runs.borrow(), vec![1, 2]);
    assert_eq!(handled.get(), 0);
}

#[test]
fn failing_update_function_goes_to_the_handler() {
    let parser = define("Parser", |scope, _: &()| {
        scope.use_error_handler(|err| text(format!("rejected: {err}")))?;
        let (value, set_value) = scope.use_state(|| 0i64)?;
        Ok(element("label")
            .attr("id", "field")
            .on("input", move |event| {
                let raw = event.value().unwrap_or_default().to_owned();
                set_value.try_update(move |_| Ok(raw.trim().parse::<i64>()?))?;
                Ok(())
            })
            .child(text(value.to_string()))
            .into())
    });
    let mut rule = RenderTestRule::new();
    rule.set_content(parser.create(())).unwrap();
    let field = rule.find("id", "field").unwrap();

    assert!(rule.fire(field, Event::new("input").with_value("12")).unwrap());
    assert_eq!(rule.text(), "12");

    assert!(rule.fire(field, Event::new("input").with_value("x")).unwrap());
    assert_eq!(
        rule.text(),
        "rejected: view of `Parser` failed: invalid digit found in string"
    );
    assert_eq!(rule.host().binding_count(), 0);
}

#[test]
fn hook_order_errors_can_be_handled() {
    let toggle = define("Toggle", |scope, extra: &bool| {
        if *extra {
            scope.use_memo(Deps::once(), || 0)?;
        }
        Ok(text("toggle"))
    });
    let frame = define("Frame", move |scope, extra: &bool| {
        scope.use_error_handler(|err| text(format!("{:?}", err.kind())))?;
        Ok(element("div").child(toggle.create(*extra)).into())
    });
    let mut rule = RenderTestRule::new();
    rule.set_content(frame.create(false)).unwrap();

    rule.set_content(frame.create(true)).unwrap();

    assert_eq!(rule.text(), "HookOrderMismatch");
}

#[test]
fn failed_subtree_degrades_to_a_placeholder_and_spares_siblings() {
    let calls = Rc::new(Cell::new(0));
    let flaky = define("Flaky", |_, fail: &bool| {
        if *fail {
            anyhow::bail!("flaked");
        }
        Ok(element("em").child("fine").into())
    });
    let counted = Rc::clone(&calls);
    let panel = define("Panel", move |scope, fail: &bool| {
        let counted = Rc::clone(&counted);
        scope.use_error_handler(move |_| {
            counted.set(counted.get() + 1);
            nothing()
        })?;
        Ok(element("div")
            .child(element("span").child("ok"))
            .child(flaky.create(*fail))
            .into())
    });
    let mut rule = RenderTestRule::new();
    rule.set_content(panel.create(false)).unwrap();
    let div = rule.root_node().unwrap();
    let sibling = rule.host().children(div)[0];

    rule.set_content(panel.create(true)).unwrap();

    assert_eq!(calls.get(), 1);
    let children = rule.host().children(div).to_vec();
    assert_eq!(children[0], sibling);
    assert_eq!(
        rule.host().node(children[1]).map(|node| node.kind.clone()),
        Some(HostNodeKind::Placeholder)
    );
    assert_eq!(rule.text(), "ok");
}

#[test]
fn failing_fallback_goes_to_the_enclosing_handler() {
    let (inner_calls, outer_calls) = (Rc::new(Cell::new(0)), Rc::new(Cell::new(0)));
    let broken = broken();
    let fallback = broken.clone();
    let counted = Rc::clone(&inner_calls);
    let inner = define("InnerBoundary", move |scope, _: &()| {
        let (counted, fallback) = (Rc::clone(&counted), fallback.clone());
        scope.use_error_handler(move |_| {
            counted.set(counted.get() + 1);
            fallback.create(()).into()
        })?;
        Ok(element("section").child(broken.create(())).into())
    });
    let counted = Rc::clone(&outer_calls);
    let outer = define("OuterBoundary", move |scope, _: &()| {
        let counted = Rc::clone(&counted);
        scope.use_error_handler(move |err| {
            counted.set(counted.get() + 1);
            caught(err)
        })?;
        Ok(element("main").child(inner.create(())).into())
    });
    let mut rule = RenderTestRule::new();

    rule.set_content(outer.create(())).unwrap();

    assert_eq!(inner_calls.get(), 1);
    assert_eq!(outer_calls.get(), 1);
    assert_eq!(rule.text(), "caught: view of `Broken` failed: no data");
    assert!(rule.find("class", "error").is_some());
}

#[test]
fn failing_fallback_without_an_enclosing_handler_reaches_the_caller() {
    let calls = Rc::new(Cell::new(0));
    let counted = Rc::clone(&calls);
    let fallback = broken();
    let lonely = define("Lonely", move |scope, _: &()| {
        let (counted, fallback) = (Rc::clone(&counted), fallback.clone());
        scope.use_error_handler(move |_| {
            counted.set(counted.get() + 1);
            fallback.create(()).into()
        })?;
        anyhow::bail!("first failure")
    });
    let mut rule = RenderTestRule::new();

    let err = rule.set_content(lonely.create(())).unwrap_err();

    assert_eq!(calls.get(), 1);
    assert_eq!(err.to_string(), "view of `Broken` failed: no data");
    assert!(rule.root_node().is_none());
}

#[test]
fn siblings_updated_before_an_unhandled_failure_finish_their_commit() {
    let log = Rc::new(RefCell::new(Vec::<String>::new()));
    let handles: Rc<RefCell<Option<InstanceHandle>>> = Rc::new(RefCell::new(None));
    let (sink, stash) = (Rc::clone(&log), Rc::clone(&handles));
    let stable = define("Stable", move |scope, value: &u32| {
        *stash.borrow_mut() = Some(scope.handle());
        let (layout_log, effect_log, value) = (Rc::clone(&sink), Rc::clone(&sink), *value);
        scope.use_layout_effect(Deps::always(), move |_| {
            layout_log.borrow_mut().push(format!("layout {value}"));
            Ok(Cleanup::none())
        })?;
        scope.use_effect(Deps::always(), move |_| {
            effect_log.borrow_mut().push(format!("effect {value}"));
            Ok(Cleanup::none())
        })?;
        Ok(text(value.to_string()))
    });
    let flaky = define("Flaky", |_, fail: &bool| {
        if *fail {
            anyhow::bail!("flaked");
        }
        Ok(text("fine"))
    });
    let view = move |value: u32, fail: bool| -> Node {
        element("div")
            .child(stable.create(value))
            .child(flaky.create(fail))
            .into()
    };
    let mut rule = RenderTestRule::new();
    rule.set_content(view(1, false)).unwrap();
    rule.flush_effects().unwrap();
    log.borrow_mut().clear();

    let err = rule.set_content(view(2, true)).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Render);
    assert_eq!(*log.borrow(), vec!["layout 2".to_string()]);
    let handle = handles.borrow().clone().unwrap();
    assert_eq!(handle.lifecycle(), Some(Lifecycle::Committed));
    assert!(handle.is_mounted());

    rule.flush_effects().unwrap();
    assert_eq!(
        *log.borrow(),
        vec!["layout 2".to_string(), "effect 2".to_string()]
    );
}
