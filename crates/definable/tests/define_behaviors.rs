//! Behavior scenarios for generated types.
//!
//! Each section exercises one part of the property pipeline end to end:
//! coercion, defaults, the setter protocol, computed getters, event typing,
//! listener-gated activation, sealing, and the async-setter watchdog.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use definable::{
    ChangeKind, Constructor, DefineConfig, DefineError, DefineType, Instance, Opaque, PropDef,
    RawSchema, Resolver, SetResolver, TypeFn, Value, batch,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Log = Rc<RefCell<Vec<(ChangeKind, Value, Value)>>>;

fn record(instance: &Instance, property: &str) -> Log {
    let log: Log = Rc::default();
    let sink = Rc::clone(&log);
    instance.on(property, move |event, new, old| {
        sink.borrow_mut().push((event.kind, new.clone(), old.clone()));
    });
    log
}

fn text(value: &Value) -> String {
    value.to_display_string()
}

fn num(value: &Value) -> f64 {
    value.as_f64().unwrap_or(f64::NAN)
}

fn define(name: &str, schema: RawSchema) -> DefineType {
    DefineType::new(name, schema).expect("schema compiles")
}

// ---------------------------------------------------------------------------
// 1. Basics
// ---------------------------------------------------------------------------

#[test]
fn computed_full_name_emits_once_per_batch() {
    let person = define(
        "Person",
        RawSchema::new().prop("first", "*").prop("last", "*").prop(
            "fullName",
            PropDef::new().get(|p, _| {
                Value::from(format!("{} {}", text(&p.get("first")), text(&p.get("last"))))
            }),
        ),
    );
    let p = person.create_with([
        ("first", Value::from("Mohamed")),
        ("last", Value::from("Cherif")),
    ]);

    let full = record(&p, "fullName");
    assert_eq!(p.get("fullName"), Value::from("Mohamed Cherif"));
    let first = record(&p, "first");

    batch::run(|| {
        p.set("first", "Justin").expect("declared");
        p.set("last", "Meyer").expect("declared");
        assert!(full.borrow().is_empty());
    });

    assert_eq!(
        *first.borrow(),
        [(ChangeKind::Set, Value::from("Justin"), Value::from("Mohamed"))]
    );
    assert_eq!(
        *full.borrow(),
        [(
            ChangeKind::Set,
            Value::from("Justin Meyer"),
            Value::from("Mohamed Cherif")
        )]
    );
}

#[test]
fn returning_and_resolving_setters_store() {
    let returning = define(
        "Defined",
        RawSchema::new().prop("prop", PropDef::new().set(|_, v, _| Value::from(format!("foo{}", text(&v))))),
    );
    let def = returning.create();
    def.set("prop", "bar").expect("declared");
    assert_eq!(def.get("prop"), Value::from("foobar"));

    let resolving = define(
        "DefinedCB",
        RawSchema::new().prop(
            "prop",
            PropDef::new().set_async(|_, v, resolver, _| {
                resolver.resolve(format!("foo{}", text(&v)));
                Value::Undefined
            }),
        ),
    );
    let def = resolving.create();
    def.set("prop", "bar").expect("declared");
    assert_eq!(def.get("prop"), Value::from("foobar"));
}

// ---------------------------------------------------------------------------
// 2. Coercion
// ---------------------------------------------------------------------------

fn add_item() -> TypeFn {
    TypeFn::new("addItem", |value, _| {
        if let Some(list) = value.as_list() {
            list.borrow_mut().push(Value::from("item"));
        }
        value
    })
}

#[test]
fn custom_type_runs_before_constructor() {
    let typer = define(
        "Typer",
        RawSchema::new()
            .prop("arrayWithAddedItem", PropDef::new().ty(add_item()))
            .prop(
                "listWithAddedItem",
                PropDef::new().ty(add_item()).ctor(Constructor::list()),
            ),
    );
    let t = typer.create();

    let array = Value::list([]);
    t.set("arrayWithAddedItem", array.clone()).expect("declared");
    assert_eq!(t.get("arrayWithAddedItem"), array);
    assert_eq!(array.as_list().map(|l| l.borrow().len()), Some(1));

    t.set("listWithAddedItem", Value::list([])).expect("declared");
    let list = t.get("listWithAddedItem");
    assert_eq!(
        list.as_list().and_then(|l| l.borrow().first().cloned()),
        Some(Value::from("item"))
    );
}

#[derive(Debug, PartialEq)]
struct Foo {
    name: String,
}

#[test]
fn constructor_type_builds_and_keeps_instances() {
    let foo = Constructor::opaque("Foo", |v| Foo { name: text(&v) });
    let typer = define("Typer", RawSchema::new().prop("foo", PropDef::new().ctor(foo.clone())));

    let t = typer.create_with([("foo", Value::from("Justin"))]);
    let built = t.get("foo");
    assert_eq!(
        built.as_opaque().and_then(Opaque::downcast_ref::<Foo>).map(|f| f.name.as_str()),
        Some("Justin")
    );

    let brian = foo.construct(Value::from("brian"));
    t.set("foo", brian.clone()).expect("declared");
    assert_eq!(t.get("foo"), brian);
}

#[test]
fn builtin_converters() {
    let typer = define(
        "Typer",
        RawSchema::new()
            .prop("date", "date")
            .prop("string", "string")
            .prop("number", "number")
            .prop("bool", "boolean")
            .prop("htmlbool", "htmlbool")
            .prop("leaveAlone", "*"),
    );
    let obj = Value::object(Vec::<(&str, Value)>::new());
    let t = typer.create_with([
        ("date", Value::from(1_395_896_701_516_i64)),
        ("string", Value::from(5)),
        ("number", Value::from("5")),
        ("bool", Value::from("false")),
        ("htmlbool", Value::from("")),
        ("leaveAlone", obj.clone()),
    ]);

    assert_eq!(
        t.get("date").as_date().map(chrono::DateTime::timestamp_millis),
        Some(1_395_896_701_516)
    );
    assert_eq!(t.get("string"), Value::from("5"));
    assert_eq!(t.get("number"), Value::from(5));
    assert_eq!(t.get("bool"), Value::from(false));
    assert_eq!(t.get("htmlbool"), Value::from(true));
    assert_eq!(t.get("leaveAlone"), obj);

    t.set("number", "15").expect("declared");
    assert_eq!(t.get("number"), Value::from(15));
}

#[test]
fn converters_handle_null_and_undefined() {
    let typer = define(
        "Typer",
        RawSchema::new()
            .prop("date", "date")
            .prop("string", "string")
            .prop("number", "number")
            .prop("boolean", "boolean")
            .prop("htmlbool", "htmlbool")
            .prop("leaveAlone", "*"),
    );
    let names = ["date", "string", "number", "boolean", "htmlbool", "leaveAlone"];

    for empty in [Value::Undefined, Value::Null] {
        let t = typer.create_with(names.iter().map(|n| (*n, empty.clone())));
        assert_eq!(t.get("date"), empty);
        assert_eq!(t.get("string"), empty);
        assert_eq!(t.get("number"), empty);
        assert_eq!(t.get("boolean"), Value::from(false));
        assert_eq!(t.get("htmlbool"), Value::from(false));
        assert_eq!(t.get("leaveAlone"), empty);
    }
}

#[test]
fn type_runs_before_the_setter() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let typer = define(
        "Typer",
        RawSchema::new().prop(
            "prop",
            PropDef::new().ty("number").set(move |_, v, _| {
                sink.borrow_mut().push(v.kind());
                Value::from(num(&v) + 1.0)
            }),
        ),
    );
    let t = typer.create();
    t.set("prop", "5").expect("declared");
    assert_eq!(t.get("prop"), Value::from(6));
    assert_eq!(*seen.borrow(), ["number"]);
}

// ---------------------------------------------------------------------------
// 3. Defaults
// ---------------------------------------------------------------------------

#[test]
fn literal_and_produced_defaults() {
    let typer = define("Typer", RawSchema::new().prop("prop", PropDef::new().value("foo")));
    assert_eq!(typer.create().get("prop"), Value::from("foo"));

    let typer = define(
        "Typer2",
        RawSchema::new().prop("prop", PropDef::new().value_with(|_| Value::list([])).ty("*")),
    );
    let (t1, t2) = (typer.create(), typer.create());
    assert!(t1.get("prop").as_list().is_some());
    assert_ne!(t1.get("prop"), t2.get("prop"));
    assert_eq!(t1.get("prop"), t1.get("prop"));
}

#[test]
fn constructed_defaults_are_per_instance() {
    let typer = define(
        "Typer",
        RawSchema::new().prop("prop", PropDef::new().value_ctor(Constructor::list()).ty("*")),
    );
    let (t1, t2) = (typer.create(), typer.create());
    assert!(t1.get("prop").as_list().is_some());
    assert_ne!(t1.get("prop"), t2.get("prop"));
}

#[test]
fn producers_run_once_and_only_when_read() {
    let runs = Rc::new(Cell::new(0));
    let counter = Rc::clone(&runs);
    let ty = define(
        "Lazy",
        RawSchema::new().prop(
            "items",
            PropDef::new().value_with(move |_| {
                counter.set(counter.get() + 1);
                Value::list([])
            }),
        ),
    );

    let untouched = ty.create();
    let overwritten = ty.create_with([("items", Value::Null)]);
    assert_eq!(runs.get(), 1, "the write compares against the default");
    drop((untouched, overwritten));

    let read = ty.create();
    let first = read.get("items");
    let second = read.get("items");
    assert_eq!(first, second);
    assert_eq!(runs.get(), 2);
}

#[test]
fn producers_can_read_other_properties() {
    let ty = define(
        "Map",
        RawSchema::new()
            .prop("letters", PropDef::new().value("ABC"))
            .prop("numbers", PropDef::new().value(Value::list([1.into(), 2.into(), 3.into()])))
            .prop("generatedLetters", PropDef::new().value_with(|_| Value::from("GHI")))
            .prop(
                "firstLetter",
                PropDef::new().value_with(|m| {
                    Value::from(text(&m.get("letters")).chars().take(1).collect::<String>())
                }),
            )
            .prop(
                "firstNumber",
                PropDef::new().value_with(|m| {
                    m.get("numbers")
                        .as_list()
                        .and_then(|l| l.borrow().first().cloned())
                        .unwrap_or_default()
                }),
            )
            .prop(
                "lastLetter",
                PropDef::new().value_with(|m| {
                    Value::from(text(&m.get("generatedLetters")).chars().nth(2).map(String::from).unwrap_or_default())
                }),
            ),
    );
    let map = ty.create();
    assert_eq!(map.get("firstLetter"), Value::from("A"));
    assert_eq!(map.get("firstNumber"), Value::from(1));
    assert_eq!(map.get("lastLetter"), Value::from("I"));
}

#[test]
fn wildcard_supplies_type_and_setter() {
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let ty = define(
        "DefaultMap",
        RawSchema::new()
            .wildcard(PropDef::new().ty("number").set(move |_, v, _| {
                counter.set(counter.get() + 1);
                v
            }))
            .prop("someNumber", PropDef::new().value("5"))
            .prop("number", PropDef::new()),
    );
    let map = ty.create();

    assert_eq!(map.get("someNumber"), Value::from(5));
    map.set("someNumber", "5").expect("declared");
    assert_eq!(map.get("someNumber"), Value::from(5));

    map.set("number", "10").expect("declared");
    assert_eq!(map.get("number"), Value::from(10));
    assert_eq!(calls.get(), 2);
}

#[test]
fn wildcard_type_converts_defaults() {
    let ty = define(
        "Person",
        RawSchema::new()
            .wildcard("string")
            .prop("first", PropDef::new().value(1))
            .prop("last", PropDef::new().value(2)),
    );
    let p = ty.create();
    assert_eq!(p.get("first"), Value::from("1"));
    assert_eq!(p.get("last"), Value::from("2"));
}

#[test]
fn nested_schemas_construct_nested_types() {
    let example = define("Example", RawSchema::new().prop("name", PropDef::new().value("Nailed it")));
    let nested_map = define(
        "NestedMap",
        RawSchema::new()
            .prop("isEnabled", PropDef::new().value(true))
            .prop("test", PropDef::new().value_ctor(&example))
            .prop(
                "examples",
                PropDef::new()
                    .ty(RawSchema::new()
                        .prop("one", PropDef::new().value_ctor(&example))
                        .prop(
                            "two",
                            PropDef::new()
                                .ty(RawSchema::new().prop("deep", PropDef::new().value_ctor(&example)))
                                .value_ctor(Constructor::object()),
                        ))
                    .value_ctor(Constructor::object()),
            ),
    );
    let nested = nested_map.create();

    let test = nested.get("test");
    let examples = nested.get("examples");
    let examples = examples.as_instance().expect("examples is constructed");
    let one = examples.get("one");
    let two = examples.get("two");
    let deep = two.as_instance().expect("two is constructed").get("deep");

    assert_eq!(examples.type_name(), "NestedMap.examples");
    for value in [&test, &one, &deep] {
        let instance = value.as_instance().expect("an Example");
        assert!(instance.is_instance_of(&example));
        assert_eq!(instance.get("name"), Value::from("Nailed it"));
    }
}

#[test]
fn default_types_are_settable() {
    let ty = define(
        "Person",
        RawSchema::new()
            .prop("first", PropDef::new().ty("string").value("Chris"))
            .prop("last", PropDef::new().ty("string").value("Gomez"))
            .prop(
                "fullName",
                PropDef::new().get(|p, _| {
                    Value::from(format!("{} {}", text(&p.get("first")), text(&p.get("last"))))
                }),
            ),
    );
    let p = ty.create();
    assert_eq!(p.get("fullName"), Value::from("Chris Gomez"));
    p.set("first", "Sara").expect("declared");
    assert_eq!(p.get("fullName"), Value::from("Sara Gomez"));
}

// ---------------------------------------------------------------------------
// 4. Setter protocol
// ---------------------------------------------------------------------------

#[test]
fn side_effect_setter_still_stores_input() {
    let ty = define(
        "Typer",
        RawSchema::new()
            .prop(
                "prop",
                PropDef::new().set_effect(|t, _| {
                    t.set("foo", "bar").expect("declared");
                }),
            )
            .prop("foo", "*"),
    );
    let t = ty.create();
    t.set("prop", false).expect("declared");

    let props = t.props();
    let props = props.as_object().expect("object").borrow().clone();
    let keys: Vec<&str> = props.keys().map(|k| &**k).collect();
    assert_eq!(keys, ["prop", "foo"]);
    assert_eq!(props.get("prop"), Some(&Value::from(false)));
    assert_eq!(props.get("foo"), Some(&Value::from("bar")));
}

fn paginate() -> DefineType {
    define(
        "Paginate",
        RawSchema::new().prop("limit", "*").prop("offset", "*").prop(
            "page",
            PropDef::new()
                .set(|p, page, _| {
                    let offset = (num(&page) - 1.0) * num(&p.get("limit"));
                    p.set("offset", offset).expect("declared");
                    Value::Undefined
                })
                .get(|p, _| Value::from((num(&p.get("offset")) / num(&p.get("limit"))).floor() + 1.0)),
        ),
    )
}

#[test]
fn paired_getter_and_setter() {
    let p = paginate().create_with([("limit", Value::from(10)), ("offset", Value::from(20))]);
    assert_eq!(p.get("page"), Value::from(3));

    let events = record(&p, "page");
    p.set("page", 2).expect("declared");

    assert_eq!(p.get("page"), Value::from(2));
    assert_eq!(p.get("offset"), Value::from(10));
    assert_eq!(
        *events.borrow(),
        [(ChangeKind::Set, Value::from(2), Value::from(3))]
    );
}

#[test]
fn paired_setter_returning_baseline_skips_write() {
    let computes = Rc::new(Cell::new(0));
    let counter = Rc::clone(&computes);
    let ty = define(
        "Map",
        RawSchema::new().prop(
            "foo",
            PropDef::new()
                .value("")
                .set(|_, v, _| v)
                .get(move |_, last| {
                    counter.set(counter.get() + 1);
                    last.clone()
                }),
        ),
    );
    let map = ty.create();
    let events = record(&map, "foo");
    let after_bind = computes.get();

    map.set("foo", "").expect("declared");
    assert_eq!(computes.get(), after_bind);
    assert!(events.borrow().is_empty());

    map.set("foo", "baz").expect("declared");
    assert_eq!(map.get("foo"), Value::from("baz"));
    assert_eq!(events.borrow().len(), 1);
}

#[test]
fn paired_get_set_reads_and_binds() {
    let ty = define(
        "Map",
        RawSchema::new().prop(
            "foo",
            PropDef::new().value("").set(|_, v, _| v).get(|_, last| last.clone()),
        ),
    );

    let map = ty.create();
    assert_eq!(map.get("foo"), Value::from(""));
    map.set("foo", "baz").expect("declared");
    assert_eq!(map.get("foo"), Value::from("baz"));

    let bound = ty.create();
    let events = record(&bound, "foo");
    assert_eq!(bound.get("foo"), Value::from(""));
    bound.set("foo", "baz").expect("declared");
    assert_eq!(bound.get("foo"), Value::from("baz"));
    assert_eq!(events.borrow().len(), 1);
}

#[test]
fn returning_undefined_without_getter_clears() {
    let ty = define(
        "T",
        RawSchema::new().prop("prop", PropDef::new().value(1).set(|_, _, _| Value::Undefined)),
    );
    let t = ty.create();
    let events = record(&t, "prop");
    t.set("prop", 5).expect("declared");
    assert_eq!(t.get("prop"), Value::Undefined);
    assert_eq!(
        *events.borrow(),
        [(ChangeKind::Set, Value::Undefined, Value::from(1))]
    );
}

#[test]
fn async_setter_completes_later() {
    let pending: Rc<RefCell<Option<(SetResolver, Value)>>> = Rc::default();
    let slot = Rc::clone(&pending);
    let ty = define(
        "Search",
        RawSchema::new().prop(
            "query",
            PropDef::new().value("initial").set_async(move |_, v, resolver, _| {
                *slot.borrow_mut() = Some((resolver.clone(), v));
                Value::Undefined
            }),
        ),
    );
    let search = ty.create();
    let events = record(&search, "query");

    search.set("query", "rust").expect("declared");
    assert_eq!(search.get("query"), Value::from("initial"));
    assert!(events.borrow().is_empty());

    let (resolver, value) = pending.borrow_mut().take().expect("setter ran");
    assert!(!resolver.is_resolved());
    resolver.resolve(value);
    assert!(resolver.is_resolved());

    assert_eq!(search.get("query"), Value::from("rust"));
    assert_eq!(
        *events.borrow(),
        [(ChangeKind::Set, Value::from("rust"), Value::from("initial"))]
    );
}

#[test]
fn async_setter_return_value_is_stored() {
    let ty = define(
        "T",
        RawSchema::new().prop(
            "prop",
            PropDef::new().set_async(|_, v, _, _| Value::from(num(&v) * 2.0)),
        ),
    );
    let t = ty.create();
    t.set("prop", 4).expect("declared");
    assert_eq!(t.get("prop"), Value::from(8));
}

#[test]
fn resolver_after_instance_drop_is_ignored() {
    let kept: Rc<RefCell<Option<SetResolver>>> = Rc::default();
    let slot = Rc::clone(&kept);
    let ty = define(
        "T",
        RawSchema::new().prop(
            "prop",
            PropDef::new().set_async(move |_, _, resolver, _| {
                *slot.borrow_mut() = Some(resolver.clone());
                Value::Undefined
            }),
        ),
    );
    let t = ty.create();
    t.set("prop", 1).expect("declared");
    drop(t);
    let resolver = kept.borrow_mut().take().expect("setter ran");
    resolver.resolve(2);
    assert!(!resolver.is_resolved());
}

// ---------------------------------------------------------------------------
// 5. Getters
// ---------------------------------------------------------------------------

#[test]
fn getter_seeded_with_constructed_default() {
    let ty = define(
        "Grabber",
        RawSchema::new().prop(
            "vals",
            PropDef::new()
                .ty("*")
                .value_ctor(Constructor::list())
                .get(|_, current| current.clone()),
        ),
    );
    let (g1, g2) = (ty.create(), ty.create());
    assert_eq!(g1.get("vals").as_list().map(|l| l.borrow().len()), Some(0));
    assert_ne!(g1.get("vals"), g2.get("vals"));
}

#[test]
fn getter_sees_default_as_last_set() {
    let ty = define(
        "MyMap",
        RawSchema::new()
            .prop("data", PropDef::new().value_with(|_| Value::list([Value::from("test")])))
            .prop(
                "size",
                PropDef::new().value(1).get(|m, val| {
                    let length = m.get("data").as_list().map_or(0, |l| l.borrow().len());
                    #[allow(clippy::cast_precision_loss)]
                    let length = length as f64;
                    Value::from(num(val) + length)
                }),
            ),
    );
    assert_eq!(ty.create().get("size"), Value::from(2));
}

#[test]
fn resolver_getter_emits_one_event_per_change() {
    let person = define("Person", RawSchema::new().prop("name", "*").prop("id", "number"));
    let resolved_person = person.clone();
    let app_state = define(
        "AppState",
        RawSchema::new()
            .prop(
                "person",
                PropDef::new()
                    .get_async(move |state, last, resolver| {
                        if last.is_truthy() {
                            last.clone()
                        } else if state.get("personId").is_truthy() {
                            resolver.resolve(Value::from(resolved_person.create_with([
                                ("name", Value::from("Jose")),
                                ("id", Value::from(5)),
                            ])));
                            Value::Undefined
                        } else {
                            Value::Null
                        }
                    })
                    .ctor(&person),
            )
            .prop("personId", "*"),
    );

    let state = app_state.create();
    let events = record(&state, "person");
    assert_eq!(state.get("person"), Value::Null);

    state.set("personId", 5).expect("declared");
    let jose = state.get("person");
    let jose = jose.as_instance().expect("resolved");
    assert!(jose.is_instance_of(&person));
    assert_eq!(jose.get("name"), Value::from("Jose"));

    state
        .set("person", Value::object([("name", Value::from("Julia"))]))
        .expect("declared");
    let julia = state.get("person");
    let julia = julia.as_instance().expect("constructed");
    assert!(julia.is_instance_of(&person));
    assert_eq!(julia.get("name"), Value::from("Julia"));

    assert_eq!(events.borrow().len(), 2);
}

#[test]
fn setting_a_getter_property_does_not_run_the_getter() {
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let ty = define(
        "Map",
        RawSchema::new().prop(
            "count",
            PropDef::new().get(move |_, last| {
                counter.set(counter.get() + 1);
                last.clone()
            }),
        ),
    );
    let _map = ty.create_with([("count", Value::from(100))]);
    assert_eq!(calls.get(), 0);
}

#[test]
fn getters_produce_change_events() {
    let ty = define("Map", RawSchema::new().prop("count", PropDef::new().get(|_, last| last.clone())));
    let map = ty.create();
    let events = record(&map, "count");
    map.set("count", 22).expect("declared");
    assert_eq!(
        *events.borrow(),
        [(ChangeKind::Set, Value::from(22), Value::Undefined)]
    );
}

#[test]
fn late_resolution_recomputes_dependents_once() {
    let resolvers: Rc<RefCell<Vec<Resolver<Value>>>> = Rc::default();
    let stash = Rc::clone(&resolvers);
    let runs = Rc::new(Cell::new(0));
    let counter = Rc::clone(&runs);
    let vm = define(
        "VM",
        RawSchema::new()
            .prop(
                "foo",
                PropDef::new().get_async(move |_, _, resolver| {
                    stash.borrow_mut().push(resolver.clone());
                    Value::Undefined
                }),
            )
            .prop(
                "bar",
                PropDef::new().get(move |vm, _| {
                    let foo = vm.get("foo");
                    if !foo.is_truthy() {
                        return Value::Undefined;
                    }
                    counter.set(counter.get() + 1);
                    Value::from(num(&foo) * 2.0)
                }),
            ),
    )
    .create();

    let _events = record(&vm, "bar");
    let pending: Vec<Resolver<Value>> = resolvers.borrow_mut().drain(..).collect();
    assert!(!pending.is_empty());
    for resolver in &pending {
        resolver.resolve(Value::from(5));
    }

    assert_eq!(vm.get("bar"), Value::from(10));
    assert_eq!(runs.get(), 1);
}

// ---------------------------------------------------------------------------
// 6. Activation and event typing
// ---------------------------------------------------------------------------

#[test]
fn computed_properties_activate_only_while_listened() {
    let runs = Rc::new(Cell::new(0));
    let counter = Rc::clone(&runs);
    let ty = define(
        "Doubler",
        RawSchema::new().prop("x", "number").prop(
            "double",
            PropDef::new().get(move |d, _| {
                counter.set(counter.get() + 1);
                Value::from(num(&d.get("x")) * 2.0)
            }),
        ),
    );
    let d = ty.create_with([("x", Value::from(1))]);

    d.set("x", 2).expect("declared");
    d.set("x", 3).expect("declared");
    assert_eq!(runs.get(), 0, "unobserved getters stay dormant");

    let listener = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&listener);
    let key = d.on("double", move |_, new, _| sink.borrow_mut().push(new.clone()));
    let bound_at = runs.get();

    d.set("x", 4).expect("declared");
    d.set("x", 5).expect("declared");
    assert_eq!(*listener.borrow(), [Value::from(8), Value::from(10)]);
    assert_eq!(runs.get(), bound_at + 2);

    assert!(d.off("double", key));
    d.set("x", 6).expect("declared");
    assert_eq!(runs.get(), bound_at + 2);
    assert_eq!(listener.borrow().len(), 2);
    assert_eq!(d.get("double"), Value::from(12));
}

#[test]
fn event_kind_distinguishes_creation() {
    let ty = define(
        "T",
        RawSchema::new()
            .prop("plain", "*")
            .prop("defaulted", PropDef::new().value(Value::Undefined).ty("any")),
    );
    let t = ty.create();
    let plain = record(&t, "plain");
    let defaulted = record(&t, "defaulted");

    t.set("plain", 1).expect("declared");
    t.set("plain", 2).expect("declared");
    t.set("plain", 2).expect("declared");
    t.set("defaulted", 1).expect("declared");

    assert_eq!(
        *plain.borrow(),
        [
            (ChangeKind::Add, Value::from(1), Value::Undefined),
            (ChangeKind::Set, Value::from(2), Value::from(1)),
        ]
    );
    assert_eq!(
        *defaulted.borrow(),
        [(ChangeKind::Set, Value::from(1), Value::Undefined)]
    );
}

#[test]
fn setter_writes_flush_together() {
    let ty = define(
        "Rect",
        RawSchema::new()
            .prop("width", "number")
            .prop("height", "number")
            .prop(
                "size",
                PropDef::new().set_effect(|r, v| {
                    r.set("width", v.clone()).expect("declared");
                    r.set("height", v.clone()).expect("declared");
                }),
            )
            .prop(
                "area",
                PropDef::new().get(|r, _| Value::from(num(&r.get("width")) * num(&r.get("height")))),
            ),
    );
    let r = ty.create_with([("width", Value::from(1)), ("height", Value::from(1))]);
    let area = record(&r, "area");

    r.set("size", 3).expect("declared");
    assert_eq!(
        *area.borrow(),
        [(ChangeKind::Set, Value::from(9), Value::from(1))]
    );
}

fn doubler() -> DefineType {
    define(
        "Doubler",
        RawSchema::new()
            .prop("x", PropDef::new().ty("number").value(1))
            .prop(
                "double",
                PropDef::new().get(|d, _| Value::from(num(&d.get("x")) * 2.0)),
            )
            .prop(
                "quad",
                PropDef::new().get(|d, _| Value::from(num(&d.get("double")) * 2.0)),
            ),
    )
}

#[test]
fn listener_reads_current_computed_value() {
    let d = doubler().create();
    let doubles = record(&d, "double");
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    d.on("x", move |event, _, _| {
        sink.borrow_mut().push(event.target.get("double"));
    });

    d.set("x", 5).expect("declared");
    assert_eq!(*seen.borrow(), [Value::from(10)]);
    assert_eq!(
        *doubles.borrow(),
        [(ChangeKind::Set, Value::from(10), Value::from(2))]
    );
}

#[test]
fn computed_read_inside_batch_is_current() {
    let d = doubler().create();
    let doubles = record(&d, "double");
    let quads = record(&d, "quad");

    let (double, quad) = batch::run(|| {
        d.set("x", 5).expect("declared");
        (d.get("double"), d.get("quad"))
    });
    assert_eq!(double, Value::from(10));
    assert_eq!(quad, Value::from(20));
    assert_eq!(
        *doubles.borrow(),
        [(ChangeKind::Set, Value::from(10), Value::from(2))]
    );
    assert_eq!(
        *quads.borrow(),
        [(ChangeKind::Set, Value::from(20), Value::from(4))]
    );
}

// ---------------------------------------------------------------------------
// 7. Sealing, methods, configuration errors
// ---------------------------------------------------------------------------

#[test]
fn sealed_instances_reject_undeclared_names() {
    let ty = DefineType::builder("Point")
        .config(DefineConfig::development())
        .build(RawSchema::new().prop("x", "number"))
        .expect("compiles");
    let p = ty.create();
    assert!(matches!(p.set("z", 1), Err(DefineError::Sealed { .. })));

    let open = DefineType::builder("Point")
        .config(DefineConfig::production())
        .build(RawSchema::new().prop("x", "number"))
        .expect("compiles");
    let p = open.create();
    p.set("z", 1).expect("unsealed");
    assert_eq!(p.get("z"), Value::from(1));
    assert_eq!(p.keys().iter().map(|k| &**k).collect::<Vec<_>>(), ["x", "z"]);
}

#[test]
fn methods_receive_the_instance() {
    let ty = define(
        "Counter",
        RawSchema::new()
            .prop("count", PropDef::new().ty("number").value(0))
            .method("add", |c, args| {
                let by = args.first().map_or(1.0, num);
                c.set("count", num(&c.get("count")) + by).expect("declared");
                c.get("count")
            }),
    );
    let c = ty.create();
    assert_eq!(c.call("add", &[Value::from(2)]), Ok(Value::from(2)));
    assert_eq!(c.call("add", &[]), Ok(Value::from(3)));
    assert_eq!(
        c.call("reset", &[]),
        Err(DefineError::UnknownMethod {
            name: "reset".into(),
            type_name: "Counter".into()
        })
    );
}

#[test]
fn unknown_type_keys_fail_at_definition() {
    let err = DefineType::new("T", RawSchema::new().prop("age", "integer")).expect_err("unknown key");
    assert_eq!(err, DefineError::unknown_type("age", "integer"));
}

// ---------------------------------------------------------------------------
// 8. Async setter watchdog
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct WarnCapture {
    lines: Arc<Mutex<Vec<String>>>,
}

#[derive(Default)]
struct FieldText(String);

impl tracing::field::Visit for FieldText {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        use std::fmt::Write;
        let _ = write!(self.0, "{}={:?} ", field.name(), value);
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for WarnCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        if *event.metadata().level() != tracing::Level::WARN {
            return;
        }
        let mut text = FieldText::default();
        event.record(&mut text);
        self.lines.lock().expect("capture lock").push(text.0);
    }
}

#[test]
fn pending_async_setter_is_reported() {
    use tracing_subscriber::layer::SubscriberExt;

    let capture = WarnCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());

    let ty = DefineType::builder("Upload")
        .config(
            DefineConfig::production()
                .with_warn_async_setters(true)
                .with_async_setter_timeout(Duration::ZERO),
        )
        .build(RawSchema::new().prop(
            "file",
            PropDef::new().set_async(|_, _, _, _| Value::Undefined),
        ))
        .expect("compiles");

    tracing::subscriber::with_default(subscriber, || {
        let upload = ty.create();
        upload.set("file", "a.txt").expect("declared");
        assert_eq!(upload.get("file"), Value::Undefined);
    });

    let lines = capture.lines.lock().expect("capture lock");
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("did not return a value or call its resolver"));
    assert!(lines[0].contains("\"file\""));
    assert!(lines[0].contains("\"Upload\""));
}

#[test]
fn resolved_async_setter_is_not_reported() {
    let ty = DefineType::builder("Upload")
        .config(
            DefineConfig::production()
                .with_warn_async_setters(true)
                .with_async_setter_timeout(Duration::from_secs(3600)),
        )
        .build(RawSchema::new().prop(
            "file",
            PropDef::new().set_async(|_, v, resolver, _| {
                resolver.resolve(v);
                Value::Undefined
            }),
        ))
        .expect("compiles");
    let upload = ty.create();
    upload.set("file", "a.txt").expect("declared");
    assert_eq!(upload.get("file"), Value::from("a.txt"));
    assert_eq!(definable::pending_async_setters(), 0);
    assert_eq!(definable::poll_async_setter_warnings(), 0);
}

// ---------------------------------------------------------------------------
// 9. Serialization
// ---------------------------------------------------------------------------

#[cfg(feature = "serde")]
#[test]
fn serializes_enumerable_properties() {
    let ty = define(
        "Person",
        RawSchema::new()
            .prop("first", "string")
            .prop("admin", PropDef::new().ty("boolean").value(false))
            .prop("secret", PropDef::new().value("x").serialize(false))
            .prop(
                "greeting",
                PropDef::new().get(|p, _| Value::from(format!("hi {}", text(&p.get("first"))))),
            )
            .prop(
                "shout",
                PropDef::new()
                    .get(|p, _| Value::from(text(&p.get("first")).to_uppercase()))
                    .serialize(true),
            ),
    );
    let p = ty.create_with([("first", Value::from("ada"))]);
    let json = serde_json::to_value(&p).expect("serializes");
    assert_eq!(
        json,
        serde_json::json!({"first": "ada", "admin": false, "shout": "ADA"})
    );
}
