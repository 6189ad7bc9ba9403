//! Counter demo: drives a page through actions and prints the wire
//! payloads a connected client would receive.

use anyhow::Result;
use livetemplate::{
    ActionContext, ActionMessage, ActionModel, Application, HandlerError, Options, Template,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const TEMPLATE: &str = r#"<div class="card">
  <h1>Counter</h1>
  <div class="count">{{.Count}}</div>
  {{if .Log}}<ul>{{range .Log}}<li>{{.}}</li>{{end}}</ul>{{else}}<p>no activity yet</p>{{end}}
</div>"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CounterState {
    #[serde(rename = "Count")]
    count: i64,
    #[serde(rename = "Log")]
    log: Vec<String>,
}

struct Counter;

impl ActionModel for Counter {
    fn model_name(&self) -> &str {
        "counter"
    }

    fn action_names(&self) -> Vec<&str> {
        vec!["increment", "decrement", "reset"]
    }

    fn handle(&self, action: &str, ctx: &mut ActionContext<'_>) -> Result<(), HandlerError> {
        let mut state: CounterState = ctx.data()?;
        let by = ctx.int("by").unwrap_or(1);
        match action {
            "increment" => state.count += by,
            "decrement" => state.count -= by,
            "reset" => state.count = 0,
            _ => unreachable!(),
        }
        state.log.push(format!("{action} -> {}", state.count));
        ctx.set_response(state)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let app = Arc::new(Application::with_options(
        "demo",
        Options::default()
            .with_metrics_enabled(true)
            .with_session_ttl(Duration::from_secs(300)),
    ));

    let cancel = CancellationToken::new();
    let cleanup = app.spawn_cleanup_task(Duration::from_secs(30), cancel.clone());

    let template = Arc::new(Template::parse(TEMPLATE)?);
    let initial = CounterState {
        count: 0,
        log: Vec::new(),
    };
    let handle = app.new_page(template, &initial)?;
    println!("session: {}", handle.session_id);
    println!("--- full page HTML ---\n{}\n", handle.page.render()?);

    handle.page.register_model(Counter);

    let first = handle.page.render_fragments(&initial)?;
    print_payload("initial tree", first);

    for (action, data) in [
        ("increment", json!({})),
        ("increment", json!({"by": 4})),
        ("counter.decrement", json!({})),
        ("reset", json!({})),
    ] {
        let msg = ActionMessage::new(action, data).with_token(handle.page.action_token());
        let update = handle.page.handle_action(&msg)?;
        print_payload(action, update);
    }

    if let Some(metrics) = app.metrics() {
        println!("metrics: {}", serde_json::to_string_pretty(&metrics)?);
    }

    cancel.cancel();
    cleanup.await?;
    app.close();
    Ok(())
}

fn print_payload(label: &str, payload: Option<Value>) {
    match payload {
        Some(value) => println!("{label}: {value}"),
        None => println!("{label}: no change"),
    }
}
