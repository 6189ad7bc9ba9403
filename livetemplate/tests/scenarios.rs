//! Cross-component scenarios: wire payloads, client round-trips, and
//! tenant isolation, driven through the public API only.

use assert_json_diff::assert_json_eq;
use livetemplate::{
    ActionContext, ActionMessage, ActionModel, Application, CacheHint, Error, HandlerError,
    Options, RenderContext, Template,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// Merge an update payload into a client's cached tree by positional key.
/// A nested object carrying `"s"` replaces the cached subtree wholesale;
/// one without `"s"` merges key by key. Arrays adopt the update's arity.
fn client_merge(cached: &mut Value, update: &Value) {
    let update_map = match update {
        Value::Object(map) => map,
        _ => {
            *cached = update.clone();
            return;
        }
    };
    if !cached.is_object() {
        *cached = update.clone();
        return;
    }
    for (key, value) in update_map {
        match value {
            Value::Object(obj) if obj.contains_key("s") => {
                cached[key.as_str()] = value.clone();
            }
            Value::Object(_) => {
                let mergeable = cached
                    .get(key.as_str())
                    .map(Value::is_object)
                    .unwrap_or(false);
                if mergeable {
                    client_merge(cached.get_mut(key.as_str()).unwrap(), value);
                } else {
                    cached[key.as_str()] = value.clone();
                }
            }
            Value::Array(items) => {
                let mut merged: Vec<Value> = Vec::with_capacity(items.len());
                let empty = Vec::new();
                let prev = cached
                    .get(key.as_str())
                    .and_then(Value::as_array)
                    .unwrap_or(&empty);
                for (i, item) in items.iter().enumerate() {
                    match prev.get(i) {
                        Some(old) if !item_replaces(item) => {
                            let mut slot = old.clone();
                            client_merge(&mut slot, item);
                            merged.push(slot);
                        }
                        _ => merged.push(item.clone()),
                    }
                }
                cached[key.as_str()] = Value::Array(merged);
            }
            _ => {
                cached[key.as_str()] = value.clone();
            }
        }
    }
}

fn item_replaces(item: &Value) -> bool {
    item.get("s").is_some()
}

/// Reconstruct HTML from a client-cached tree.
fn client_render(tree: &Value) -> String {
    match tree {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(client_render).collect(),
        Value::Object(map) => {
            let statics = map
                .get("s")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let mut out = String::new();
            for (i, st) in statics.iter().enumerate() {
                out.push_str(st.as_str().unwrap_or_default());
                if i + 1 < statics.len() {
                    if let Some(slot) = map.get(&i.to_string()) {
                        out.push_str(&client_render(slot));
                    }
                }
            }
            out
        }
        _ => String::new(),
    }
}

/// Expected HTML for a template and data: a throwaway page's full render
/// with the wrapper attribute removed.
fn reference_html(src: &str, data: &Value) -> String {
    let app = Application::new("reference");
    let handle = app
        .new_page(Arc::new(Template::parse(src).unwrap()), data.clone())
        .unwrap();
    strip_wrapper(&handle.page.render().unwrap())
}

fn strip_wrapper(html: &str) -> String {
    let marker = " data-lvt-id=\"";
    match html.find(marker) {
        Some(start) => {
            let rest = &html[start + marker.len()..];
            let end = rest.find('"').map(|i| start + marker.len() + i + 1);
            match end {
                Some(end) => format!("{}{}", &html[..start], &html[end..]),
                None => html.to_string(),
            }
        }
        None => html.to_string(),
    }
}

/// Drive a page through a data sequence, merging every payload into a
/// simulated client and checking the reconstruction at each step.
fn assert_round_trip(src: &str, sequence: &[Value]) {
    let app = Application::new("round-trip");
    let handle = app
        .new_page(Arc::new(Template::parse(src).unwrap()), sequence[0].clone())
        .unwrap();

    let mut client = Value::Null;
    for data in sequence {
        if let Some(payload) = handle.page.render_fragments(data.clone()).unwrap() {
            if client.is_null() {
                client = payload;
            } else {
                client_merge(&mut client, &payload);
            }
        }
        assert_eq!(
            client_render(&client),
            reference_html(src, data),
            "client desynced at data {data}"
        );
    }
}

#[test]
fn s1_scalar_field() {
    let app = Application::new("s1");
    let template = Arc::new(Template::parse("<p>Hello {{.Name}}!</p>").unwrap());
    let handle = app.new_page(template, json!({"Name": "World"})).unwrap();

    let initial = handle
        .page
        .render_fragments(json!({"Name": "World"}))
        .unwrap()
        .unwrap();
    assert_json_eq!(
        initial,
        json!({"s": ["<p>Hello ", "!</p>"], "0": "World"})
    );

    let update = handle
        .page
        .render_fragments(json!({"Name": "Ada"}))
        .unwrap()
        .unwrap();
    assert_json_eq!(update, json!({"0": "Ada"}));
}

#[test]
fn s2_conditional_branch_change() {
    let app = Application::new("s2");
    let template = Arc::new(Template::parse("{{if .Active}}on{{else}}off{{end}}").unwrap());
    let handle = app.new_page(template, json!({"Active": true})).unwrap();

    let initial = handle
        .page
        .render_fragments(json!({"Active": true}))
        .unwrap()
        .unwrap();
    assert_json_eq!(
        initial,
        json!({"s": ["", ""], "0": {"s": ["on"], "0": ""}})
    );

    let update = handle
        .page
        .render_fragments(json!({"Active": false}))
        .unwrap()
        .unwrap();
    assert_json_eq!(update, json!({"0": {"s": ["off"], "0": ""}}));
}

#[test]
fn s3_range_growth() {
    let app = Application::new("s3");
    let template = Arc::new(
        Template::parse("<ul>{{range .Items}}<li>{{.}}</li>{{end}}</ul>").unwrap(),
    );
    let handle = app.new_page(template, json!({"Items": ["a", "b"]})).unwrap();

    let initial = handle
        .page
        .render_fragments(json!({"Items": ["a", "b"]}))
        .unwrap()
        .unwrap();
    assert_json_eq!(
        initial,
        json!({
            "s": ["<ul>", "</ul>"],
            "0": [
                {"s": ["<li>", "</li>"], "0": "a"},
                {"s": ["<li>", "</li>"], "0": "b"}
            ]
        })
    );

    let update = handle
        .page
        .render_fragments(json!({"Items": ["a", "b", "c"]}))
        .unwrap()
        .unwrap();
    assert_json_eq!(
        update,
        json!({"0": [{}, {}, {"s": ["<li>", "</li>"], "0": "c"}]})
    );
}

#[test]
fn s4_session_isolation() {
    let app_a = Application::new("tenant-a");
    let app_b = Application::new("tenant-b");
    let template = Arc::new(Template::parse("<p>{{.X}}</p>").unwrap());
    let handle = app_a.new_page(template, json!({"X": "1"})).unwrap();

    assert!(app_a.get_page(&handle.session_id).is_ok());
    assert!(matches!(
        app_b.get_page(&handle.session_id),
        Err(Error::InvalidSession)
    ));
}

struct ModelA;

impl ActionModel for ModelA {
    fn model_name(&self) -> &str {
        "modela"
    }
    fn action_names(&self) -> Vec<&str> {
        vec!["increment"]
    }
    fn handle(
        &self,
        _action: &str,
        ctx: &mut ActionContext<'_>,
    ) -> Result<(), HandlerError> {
        let count = ctx.current().get("Count").and_then(Value::as_i64).unwrap_or(0);
        ctx.set_response(json!({"Count": count + 1}))
    }
}

struct ModelB;

impl ActionModel for ModelB {
    fn model_name(&self) -> &str {
        "modelb"
    }
    fn action_names(&self) -> Vec<&str> {
        vec!["increment"]
    }
    fn handle(
        &self,
        _action: &str,
        ctx: &mut ActionContext<'_>,
    ) -> Result<(), HandlerError> {
        let count = ctx.current().get("Count").and_then(Value::as_i64).unwrap_or(0);
        ctx.set_response(json!({"Count": count + 10}))
    }
}

#[test]
fn s5_ambiguous_action_enumerates_candidates() {
    let app = Application::new("s5");
    let template = Arc::new(Template::parse("<p>{{.Count}}</p>").unwrap());
    let handle = app.new_page(template, json!({"Count": 0})).unwrap();
    handle.page.render_fragments(json!({"Count": 0})).unwrap();
    handle.page.register_model(ModelA);
    handle.page.register_model(ModelB);

    let msg = ActionMessage::new("increment", json!({}));
    match handle.page.handle_action(&msg) {
        Err(Error::AmbiguousAction { candidates, .. }) => {
            assert_eq!(
                candidates,
                vec!["modela.increment".to_string(), "modelb.increment".to_string()]
            );
        }
        Err(other) => panic!("expected AmbiguousAction, got {other:?}"),
        Ok(_) => panic!("expected AmbiguousAction, got a payload"),
    }

    let msg = ActionMessage::new("modela.increment", json!({}));
    let update = handle.page.handle_action(&msg).unwrap().unwrap();
    assert_json_eq!(update, json!({"0": "1"}));
}

#[test]
fn s6_cache_hint_strips_statics_from_the_fragment() {
    let app = Application::new("s6");
    let template = Arc::new(Template::parse("{{if .On}}[{{.V}}]{{else}}off{{end}}").unwrap());
    let handle = app.new_page(template, json!({"On": true, "V": "1"})).unwrap();
    handle
        .page
        .render_fragments(json!({"On": true, "V": "1"}))
        .unwrap();

    // A branch change would normally carry the new branch's statics; the
    // hint says the client caches this fragment, so they are dropped
    // while the changed dynamics still arrive.
    let ctx = RenderContext::new().with_cache_hint(CacheHint::new().with_fragment("0"));
    let update = handle
        .page
        .render_fragments_with(json!({"On": false, "V": "1"}), &ctx)
        .unwrap()
        .unwrap();
    assert_json_eq!(update, json!({"0": {"0": ""}}));
}

#[test]
fn round_trip_scalar_sequence() {
    assert_round_trip(
        "<p>Hello {{.Name}}!</p>",
        &[
            json!({"Name": "World"}),
            json!({"Name": "Ada"}),
            json!({"Name": "Ada"}),
            json!({"Name": "Grace"}),
        ],
    );
}

#[test]
fn round_trip_conditional_flips() {
    assert_round_trip(
        "<div>{{if .On}}<b>{{.V}}</b>{{else}}off{{end}}</div>",
        &[
            json!({"On": true, "V": "1"}),
            json!({"On": true, "V": "2"}),
            json!({"On": false, "V": "2"}),
            json!({"On": true, "V": "3"}),
        ],
    );
}

#[test]
fn round_trip_range_resizing() {
    assert_round_trip(
        "<ul>{{range .Items}}<li>{{.}}</li>{{end}}</ul>",
        &[
            json!({"Items": ["a", "b"]}),
            json!({"Items": ["a", "b", "c"]}),
            json!({"Items": ["a", "z", "c"]}),
            json!({"Items": ["a"]}),
            json!({"Items": []}),
            json!({"Items": ["fresh"]}),
        ],
    );
}

#[test]
fn round_trip_nested_structures() {
    assert_round_trip(
        "{{with .User}}<h1>{{.Name}}</h1>{{if .Admin}}admin{{end}}{{else}}anon{{end}}\
         <ul>{{range $i, $v := .Rows}}<li>{{$i}}:{{$v}}</li>{{else}}<li>none</li>{{end}}</ul>",
        &[
            json!({"User": {"Name": "ada", "Admin": true}, "Rows": ["x"]}),
            json!({"User": {"Name": "ada", "Admin": false}, "Rows": ["x", "y"]}),
            json!({"User": null, "Rows": []}),
            json!({"User": {"Name": "bob", "Admin": true}, "Rows": ["z"]}),
        ],
    );
}

#[test]
fn templates_without_holes_never_update() {
    let app = Application::new("static");
    let template = Arc::new(Template::parse("<p>static</p>").unwrap());
    let handle = app.new_page(template, json!({})).unwrap();

    let initial = handle.page.render_fragments(json!({})).unwrap().unwrap();
    assert_json_eq!(initial, json!({"s": ["<p>static</p>"]}));
    assert!(handle.page.render_fragments(json!({})).unwrap().is_none());
    assert!(handle
        .page
        .render_fragments(json!({"ignored": 1}))
        .unwrap()
        .is_none());
}

#[test]
fn single_leaf_change_updates_exactly_one_path() {
    let app = Application::new("leaf");
    let template = Arc::new(
        Template::parse("{{.Top}}{{with .U}}{{.A}}{{.B}}{{end}}").unwrap(),
    );
    let handle = app
        .new_page(template, json!({"Top": "t", "U": {"A": "1", "B": "2"}}))
        .unwrap();
    handle
        .page
        .render_fragments(json!({"Top": "t", "U": {"A": "1", "B": "2"}}))
        .unwrap();

    let update = handle
        .page
        .render_fragments(json!({"Top": "t", "U": {"A": "1", "B": "3"}}))
        .unwrap()
        .unwrap();
    assert_json_eq!(update, json!({"1": {"1": "3"}}));
}

/// Structural invariants on an initial payload: at every level with
/// statics, `len(s) == slots + 1` (save the empty-branch sentinel), and
/// positional keys are the contiguous integers from zero in order.
fn assert_level_invariants(level: &Value) {
    let map = match level {
        Value::Object(map) => map,
        Value::Array(items) => {
            for item in items {
                assert_level_invariants(item);
            }
            return;
        }
        _ => return,
    };
    let keys: Vec<&String> = map.keys().filter(|k| k.as_str() != "s").collect();
    for (i, key) in keys.iter().enumerate() {
        assert_eq!(key.as_str(), i.to_string(), "keys must be contiguous");
    }
    if let Some(statics) = map.get("s").and_then(Value::as_array) {
        let sentinel = keys.len() == 1
            && statics.len() == 1
            && map.get("0").and_then(Value::as_str) == Some("");
        if !sentinel {
            assert_eq!(
                statics.len(),
                keys.len() + 1,
                "statics must be one longer than the slots"
            );
        }
    }
    for key in keys {
        assert_level_invariants(&map[key.as_str()]);
    }
}

#[test]
fn initial_payloads_satisfy_structural_invariants() {
    let sources = [
        "<p>Hello {{.Name}}!</p>",
        "{{if .On}}on{{else}}off{{end}}",
        "<ul>{{range .Items}}<li>{{.}}</li>{{end}}</ul>",
        "{{with .U}}{{.A}}-{{.B}}{{end}}{{.Top}}",
    ];
    let data = json!({
        "Name": "World", "On": true, "Items": ["a", "b"],
        "U": {"A": "1", "B": "2"}, "Top": "t"
    });
    for src in sources {
        let app = Application::new("invariants");
        let handle = app
            .new_page(Arc::new(Template::parse(src).unwrap()), data.clone())
            .unwrap();
        let initial = handle.page.render_fragments(data.clone()).unwrap().unwrap();
        assert_level_invariants(&initial);
    }
}

#[test]
fn escaped_values_round_trip() {
    let app = Application::new("escape");
    let template = Arc::new(Template::parse("<p>{{.X}}</p>").unwrap());
    let handle = app
        .new_page(template, json!({"X": "<script>alert('&')</script>"}))
        .unwrap();
    let initial = handle
        .page
        .render_fragments(json!({"X": "<script>alert('&')</script>"}))
        .unwrap()
        .unwrap();
    assert_json_eq!(
        initial,
        json!({
            "s": ["<p>", "</p>"],
            "0": "&lt;script&gt;alert(&#39;&amp;&#39;)&lt;/script&gt;"
        })
    );
}

#[test]
fn flattened_invocations_render_like_inline_bodies() {
    assert_round_trip(
        "{{template \"user\" .User}}{{define \"user\"}}<b>{{.Name}}</b>{{end}}",
        &[
            json!({"User": {"Name": "ada"}}),
            json!({"User": {"Name": "bob"}}),
        ],
    );
}

#[test]
fn page_limit_and_memory_cap_are_enforced() {
    let app = Application::with_options(
        "caps",
        Options::default().with_max_pages(1),
    );
    let template = Arc::new(Template::parse("x").unwrap());
    app.new_page(Arc::clone(&template), json!({})).unwrap();
    assert!(matches!(
        app.new_page(template, json!({})),
        Err(Error::PageLimit { .. })
    ));
}
