//! End-to-end engine scenarios driven through the dispatcher

use serde_json::{json, Value};
use spica_core::{
    Engine, EngineOptions, EngineRequest, Outcome, ParamSpec, ProbeClient, Resolver, ScopeError,
    SensorFailure,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn engine() -> Engine {
    let mut engine = Engine::new(EngineOptions {
        check_root: "/tests".to_string(),
        sensor_root: "/sensors".to_string(),
        public_base: "http://diag.example".to_string(),
    });
    engine
        .add_target("staging", "widgetapi", "http://localhost:8081")
        .unwrap();
    engine
}

struct TargetEcho;

fn with_target_echo(engine: &mut Engine) {
    engine.suite(|_: &Resolver<'_>| Ok(TargetEcho), |suite| {
        suite.check("get_target", vec![], |_suite, ctx| async move {
            Outcome::value(ctx.target().info())
        });
    });
}

#[tokio::test]
async fn test_execution_reports_target_scope() {
    let mut engine = engine();
    with_target_echo(&mut engine);

    let response = engine
        .dispatch(EngineRequest::get("/tests/staging/widgetapi/get_target", ""))
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body["Passed"], json!(true));
    assert_eq!(response.body["ReturnValue"]["Environment"], json!("staging"));
    assert_eq!(response.body["ReturnValue"]["Application"], json!("widgetapi"));
    assert!(response.body["Duration"].is_u64());
    assert!(response.body.get("Exception").is_none());
}

#[tokio::test]
async fn test_case_insensitive_target_lookup() {
    let mut engine = engine();
    with_target_echo(&mut engine);

    let response = engine
        .dispatch(EngineRequest::get("/tests/STAGING/WidgetApi/get_target", ""))
        .await;
    assert_eq!(response.status, 200);
    // Original casing is preserved in the echoed scope.
    assert_eq!(response.body["ReturnValue"]["Environment"], json!("staging"));
}

#[tokio::test]
async fn test_unknown_routes_are_404() {
    let mut engine = engine();
    with_target_echo(&mut engine);

    for path in [
        "/tests/production",
        "/tests/production/widgetapi",
        "/tests/staging/otherapp/get_target",
        "/tests/staging/widgetapi/no_such_test",
    ] {
        let response = engine.dispatch(EngineRequest::get(path, "")).await;
        assert_eq!(response.status, 404, "{}", path);
    }
}

#[tokio::test]
async fn test_unresolvable_dependency_lists_but_fails_execution() {
    struct MissingBackend;
    struct NeedsBackend {
        #[allow(dead_code)]
        backend: Arc<MissingBackend>,
    }

    let mut engine = engine();
    engine.suite(
        |resolver: &Resolver<'_>| {
            Ok(NeedsBackend {
                backend: resolver.resolve::<MissingBackend>()?,
            })
        },
        |suite| {
            suite.check_sync("needs_backend", vec![], |_, _| ());
        },
    );

    // Listing still includes the check: the predicate-free suite is
    // applicable by default and resolution only happens at execution.
    let list = engine.dispatch(EngineRequest::get("/tests", "")).await;
    assert_eq!(list.status, 200);
    let names: Vec<&str> = list.body["Tests"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["Name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"needs_backend"));

    let run = engine
        .dispatch(EngineRequest::get(
            "/tests/staging/widgetapi/needs_backend",
            "",
        ))
        .await;
    assert_eq!(run.status, 500);
    assert_eq!(run.body["Passed"], json!(false));
    assert!(run.body["Exception"]
        .as_str()
        .unwrap()
        .contains("MissingBackend"));
}

struct Echo;

fn with_echo(engine: &mut Engine) {
    engine.suite(|_: &Resolver<'_>| Ok(Echo), |suite| {
        suite.check(
            "echo",
            vec![ParamSpec::new("foo", "bar"), ParamSpec::new("count", 1)],
            |_suite, ctx| async move {
                format!("{} - {}", ctx.param_str("foo"), ctx.param_str("count"))
            },
        );
    });
}

#[tokio::test]
async fn test_parameter_defaults_and_overrides() {
    let mut engine = engine();
    with_echo(&mut engine);

    let defaults = engine
        .dispatch(EngineRequest::get("/tests/staging/widgetapi/echo", ""))
        .await;
    assert_eq!(defaults.status, 200);
    assert_eq!(defaults.body["ReturnValue"], json!("bar - 1"));

    let partial = engine
        .dispatch(EngineRequest::get("/tests/staging/widgetapi/echo", "count=5"))
        .await;
    assert_eq!(partial.body["ReturnValue"], json!("bar - 5"));

    let both = engine
        .dispatch(EngineRequest::get(
            "/tests/staging/widgetapi/echo",
            "foo=baz&count=7",
        ))
        .await;
    assert_eq!(both.body["ReturnValue"], json!("baz - 7"));
}

#[tokio::test]
async fn test_uncoercible_parameter_is_400() {
    let mut engine = engine();
    with_echo(&mut engine);

    let response = engine
        .dispatch(EngineRequest::get(
            "/tests/staging/widgetapi/echo",
            "count=gronk",
        ))
        .await;
    assert_eq!(response.status, 400);
    let message = response.body["Message"].as_str().unwrap();
    assert!(message.contains("count"), "{}", message);
    assert!(message.contains("integer"), "{}", message);
}

#[tokio::test]
async fn test_post_executes_like_get() {
    let mut engine = engine();
    with_echo(&mut engine);

    let response = engine
        .dispatch(EngineRequest::post(
            "/tests/staging/widgetapi/echo",
            "count=3",
        ))
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body["ReturnValue"], json!("bar - 3"));
}

fn listed_names(body: &Value) -> Vec<String> {
    body["Tests"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["Name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_tag_filter_on_listing() {
    struct Smoke;
    struct Nightly;

    let mut engine = engine();
    engine.suite(|_: &Resolver<'_>| Ok(Smoke), |suite| {
        suite.tag("smoke");
        suite.check_sync("ping", vec![], |_, _| ());
    });
    engine.suite(|_: &Resolver<'_>| Ok(Nightly), |suite| {
        suite.tag("smoke").tag("slow");
        suite.check_sync("deep_scan", vec![], |_, _| ());
    });

    let all = engine.dispatch(EngineRequest::get("/tests", "")).await;
    assert_eq!(listed_names(&all.body), vec!["deep_scan", "ping"]);

    let smoke = engine
        .dispatch(EngineRequest::get("/tests", "smoke=true"))
        .await;
    assert_eq!(listed_names(&smoke.body), vec!["deep_scan", "ping"]);

    let fast_smoke = engine
        .dispatch(EngineRequest::get("/tests", "smoke=true&slow=false"))
        .await;
    assert_eq!(listed_names(&fast_smoke.body), vec!["ping"]);

    let slow_only = engine
        .dispatch(EngineRequest::get("/tests", "slow=true"))
        .await;
    assert_eq!(listed_names(&slow_only.body), vec!["deep_scan"]);
}

#[tokio::test]
async fn test_parameter_keys_do_not_act_as_tags() {
    let mut engine = engine();
    with_echo(&mut engine);

    // "count" is a declared parameter, so "count=true" must not become an
    // include filter that hides the untagged check.
    let response = engine
        .dispatch(EngineRequest::get("/tests", "count=true"))
        .await;
    assert_eq!(listed_names(&response.body), vec!["echo"]);
}

#[tokio::test]
async fn test_cases_expand_listing_and_gate_setup() {
    static SETUPS: AtomicUsize = AtomicUsize::new(0);

    let mut engine = engine();
    with_echo(&mut engine);
    engine
        .case("echo", vec![("count".to_string(), json!(5))])
        .unwrap();
    engine
        .case_with_setup(
            "echo",
            vec![("count".to_string(), json!(9)), ("foo".to_string(), json!("qux"))],
            || {
                SETUPS.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

    let list = engine.dispatch(EngineRequest::get("/tests", "")).await;
    let tests = list.body["Tests"].as_array().unwrap();
    assert_eq!(tests.len(), 2);
    let urls: Vec<&str> = tests.iter().map(|t| t["Url"].as_str().unwrap()).collect();
    assert_eq!(
        urls,
        vec![
            "http://diag.example/tests/staging/widgetapi/echo?count=5",
            "http://diag.example/tests/staging/widgetapi/echo?count=9&foo=qux",
        ]
    );
    // Effective parameters merge the case over the defaults.
    assert_eq!(tests[0]["Parameters"], json!({"count": 5, "foo": "bar"}));
    assert_eq!(tests[1]["Parameters"], json!({"count": 9, "foo": "qux"}));

    // Setup runs only when the bound query matches the case exactly.
    engine
        .dispatch(EngineRequest::get("/tests/staging/widgetapi/echo", "count=9&foo=qux"))
        .await;
    assert_eq!(SETUPS.load(Ordering::SeqCst), 1);
    engine
        .dispatch(EngineRequest::get("/tests/staging/widgetapi/echo", "count=9"))
        .await;
    assert_eq!(SETUPS.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_case_for_unknown_check_is_rejected() {
    let mut engine = engine();
    let err = engine.case("nope", vec![]).unwrap_err();
    assert!(err.to_string().contains("nope"));
}

#[tokio::test]
async fn test_applicability_gates_listing_and_execution_consistently() {
    struct ProdOnly;

    let mut engine = engine();
    engine
        .add_target("production", "widgetapi", "http://localhost:8082")
        .unwrap();
    engine.suite(|_: &Resolver<'_>| Ok(ProdOnly), |suite| {
        suite.applicable_to_environment(|_, env| env.eq_ignore_ascii_case("production"));
        suite.check_sync("prod_probe", vec![], |_, _| ());
    });

    let staging = engine
        .dispatch(EngineRequest::get("/tests/staging", ""))
        .await;
    assert!(listed_names(&staging.body).is_empty());

    let production = engine
        .dispatch(EngineRequest::get("/tests/production", ""))
        .await;
    assert_eq!(listed_names(&production.body), vec!["prod_probe"]);

    // What listing hides, execution refuses.
    let run = engine
        .dispatch(EngineRequest::get(
            "/tests/staging/widgetapi/prod_probe",
            "",
        ))
        .await;
    assert_eq!(run.status, 404);

    let run = engine
        .dispatch(EngineRequest::get(
            "/tests/production/widgetapi/prod_probe",
            "",
        ))
        .await;
    assert_eq!(run.status, 200);
}

#[tokio::test]
async fn test_scope_override_reaches_check() {
    struct Connectivity;

    let mut engine = Engine::default();
    engine
        .add_target_with(
            "staging",
            "widgetapi",
            "http://localhost:8081",
            |builder| {
                builder.register::<ProbeClient, _>(|_| {
                    Ok(ProbeClient::new(
                        "http://healthcheck:9200".parse().map_err(|_| {
                            ScopeError::Missing("ProbeClient")
                        })?,
                    ))
                });
            },
        )
        .unwrap();
    engine.suite(|_: &Resolver<'_>| Ok(Connectivity), |suite| {
        suite.check("probe_address", vec![], |_suite, ctx| async move {
            let client = ctx.resolve::<ProbeClient>()?;
            Outcome::value(client.base_address().to_string())
        });
    });

    let response = engine
        .dispatch(EngineRequest::get(
            "/tests/staging/widgetapi/probe_address",
            "",
        ))
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body["ReturnValue"], json!("http://healthcheck:9200/"));
}

#[tokio::test]
async fn test_diagnostic_log_is_per_execution() {
    struct Chatty;

    let mut engine = engine();
    engine.suite(|_: &Resolver<'_>| Ok(Chatty), |suite| {
        suite.check(
            "chatty",
            vec![ParamSpec::new("who", "nobody")],
            |_suite, ctx| async move {
                ctx.log(format!("hello {}", ctx.param_str("who")));
            },
        );
    });

    let engine = Arc::new(engine);
    let a = engine.dispatch(EngineRequest::get(
        "/tests/staging/widgetapi/chatty",
        "who=alice",
    ));
    let b = engine.dispatch(EngineRequest::get(
        "/tests/staging/widgetapi/chatty",
        "who=bob",
    ));
    let (a, b) = tokio::join!(a, b);
    assert_eq!(a.body["Log"], json!("hello alice\n"));
    assert_eq!(b.body["Log"], json!("hello bob\n"));
}

#[tokio::test]
async fn test_sensor_overview_and_single_reads() {
    let mut engine = engine();
    engine.sensor("uptime_seconds", "host", || async { Ok(3600u64) });
    engine.sensor("queue", "queues", || async {
        Err::<u64, _>(SensorFailure::new("broker down"))
    });

    let overview = engine.dispatch(EngineRequest::get("/sensors", "")).await;
    assert_eq!(overview.status, 200);
    assert_eq!(overview.body["uptime_seconds"], json!(3600));
    assert_eq!(overview.body["queue"]["Error"], json!("broker down"));
    assert_eq!(
        overview.body["_links"]["uptime_seconds"]["href"],
        json!("http://diag.example/sensors/uptime_seconds")
    );

    let single = engine
        .dispatch(EngineRequest::get("/sensors/uptime_seconds", ""))
        .await;
    assert_eq!(single.status, 200);
    assert_eq!(single.body["Value"], json!(3600));
    assert_eq!(single.body["Name"], json!("uptime_seconds"));

    let missing = engine.dispatch(EngineRequest::get("/sensors/nope", "")).await;
    assert_eq!(missing.status, 404);
}
