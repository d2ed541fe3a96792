use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Context as _;
use trellis_core::{
    define, element, mount, text, Cleanup, ComponentFactory, Deps, Event, HostHandle, MemoryHost,
    Setter,
};
use trellis_runtime_std::StdRuntime;

#[derive(Clone, Debug, PartialEq)]
struct Entry {
    id: u32,
    label: String,
}

fn counter() -> ComponentFactory<i32> {
    define("Counter", |scope, step: &i32| {
        let step = *step;
        let (count, set_count) = scope.use_state(|| 0)?;
        let label = scope.use_ref(String::new)?;
        scope.use_layout_effect(Deps::on(count), {
            let label = label.clone();
            move |fx| {
                label.set(format!("count {count} on {:?}", fx.host_node()));
                Ok(Cleanup::none())
            }
        })?;
        scope.use_effect(Deps::on(count), move |_| {
            log::info!("counter settled at {count}");
            Ok(Cleanup::none())
        })?;
        Ok(element("section")
            .attr("class", "counter")
            .child(text(format!("count: {count}")))
            .child(
                element("button")
                    .attr("id", "increment")
                    .on("click", move |_| {
                        set_count.update(move |n| n + step)?;
                        Ok(())
                    })
                    .child("+"),
            )
            .into())
    })
}

fn entry_row() -> ComponentFactory<(Entry, Setter<Vec<Entry>>)> {
    define("EntryRow", |_, (entry, entries): &(Entry, Setter<Vec<Entry>>)| {
        let (id, entries) = (entry.id, entries.clone());
        Ok(element("li")
            .child(text(entry.label.clone()))
            .child(
                element("button")
                    .attr("id", format!("drop-{id}"))
                    .on("click", move |_| {
                        entries.update(move |list| {
                            list.iter().filter(|entry| entry.id != id).cloned().collect()
                        })?;
                        Ok(())
                    })
                    .child("x"),
            )
            .into())
    })
}

fn entry_list() -> ComponentFactory<()> {
    let row = entry_row();
    define("EntryList", move |scope, _: &()| {
        let (entries, set_entries) = scope.use_state(|| {
            ["alpha", "beta", "gamma"]
                .iter()
                .zip(1..)
                .map(|(label, id)| Entry {
                    id,
                    label: label.to_string(),
                })
                .collect::<Vec<_>>()
        })?;
        scope.use_error_handler(|err| text(format!("list unavailable: {err}")))?;
        let rotate = set_entries.clone();
        Ok(element("div")
            .child(
                element("button")
                    .attr("id", "rotate")
                    .on("click", move |_| {
                        rotate.update(|list| {
                            let mut next = list.clone();
                            next.rotate_left(1);
                            next
                        })?;
                        Ok(())
                    })
                    .child("rotate"),
            )
            .child(element("ul").children(entries.into_iter().map(|entry| {
                let id = entry.id;
                row.keyed(&id, (entry, set_entries.clone()))
            })))
            .into())
    })
}

fn click(host: &RefCell<MemoryHost>, container: HostHandle, id: &str) -> anyhow::Result<()> {
    let target = host
        .borrow()
        .find_by_attribute(container, "id", &id.into())
        .with_context(|| format!("no element with id `{id}`"))?;
    if !MemoryHost::emit(host, target, Event::new("click"))? {
        anyhow::bail!("`{id}` has no click listener");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let host = Rc::new(RefCell::new(MemoryHost::new()));
    let container = host.borrow_mut().create_container("app");
    let runtime = StdRuntime::new(Rc::clone(&host));

    let app = element("main")
        .child(counter().create(2))
        .child(entry_list().create(()));
    let mut root = mount(&runtime.runtime(), app, container)?;
    let ticks = runtime.run_until_idle()?;
    log::info!("mounted after {ticks} deferred ticks");
    println!("{}", host.borrow().dump_tree(container));

    for id in ["increment", "increment", "rotate", "drop-2"] {
        click(&host, container, id)?;
        runtime.run_until_idle()?;
        println!("after `{id}`:\n{}", host.borrow().dump_tree(container));
    }

    root.unmount()?;
    println!("host nodes left after unmount: {}", host.borrow().len());
    Ok(())
}
