//! Request dispatch
//!
//! The dispatcher maps an abstract request (method, path, query) onto an
//! abstract response (status, JSON body), so the engine can sit behind any
//! HTTP host. Under the check root, zero to two path segments select list
//! mode and exactly three select execute mode; the sensor root serves the
//! overview document and single readings.

use crate::constraint::TagFilter;
use crate::params::{self, ParamSet};
use crate::suite::{CheckContext, DiagnosticLog};
use crate::Engine;
use schema::{ExecutionReport, TestEntry, TestList};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::{debug, info};

/// Methods the engine itself distinguishes; hosts reject everything else
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    Get,
    Post,
}

/// Abstract request fed to [`Engine::dispatch`]
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub method: RequestMethod,
    /// Path component, beginning with `/`
    pub path: String,
    /// Decoded query pairs in request order
    pub query: Vec<(String, String)>,
}

impl EngineRequest {
    /// A GET request with path and raw query string, as hosts receive them
    pub fn get(path: &str, raw_query: &str) -> Self {
        Self {
            method: RequestMethod::Get,
            path: path.to_string(),
            query: params::parse_query(raw_query),
        }
    }

    /// A POST request with path and raw query string
    pub fn post(path: &str, raw_query: &str) -> Self {
        Self {
            method: RequestMethod::Post,
            path: path.to_string(),
            query: params::parse_query(raw_query),
        }
    }
}

/// Abstract response produced by [`Engine::dispatch`]
#[derive(Debug, Clone)]
pub struct EngineResponse {
    pub status: u16,
    pub body: Value,
}

impl EngineResponse {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn bad_request(message: String) -> Self {
        Self {
            status: 400,
            body: json!({ "Message": message }),
        }
    }

    fn not_found(message: String) -> Self {
        Self {
            status: 404,
            body: json!({ "Message": message }),
        }
    }

    fn method_not_allowed() -> Self {
        Self {
            status: 405,
            body: json!({ "Message": "Method not allowed" }),
        }
    }
}

impl Engine {
    /// Route one request to the check or sensor surface
    pub async fn dispatch(&self, request: EngineRequest) -> EngineResponse {
        debug!(path = %request.path, "dispatching request");
        if let Some(rest) = strip_root(&request.path, &self.options.check_root) {
            return self.dispatch_checks(&request, rest).await;
        }
        if let Some(rest) = strip_root(&request.path, &self.options.sensor_root) {
            return self.dispatch_sensors(&request, rest).await;
        }
        EngineResponse::not_found(format!("No route for '{}'", request.path))
    }

    async fn dispatch_checks(&self, request: &EngineRequest, rest: &str) -> EngineResponse {
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        match segments[..] {
            [] => self.list(request, None, None),
            [environment] => self.list(request, Some(environment), None),
            [environment, application] => self.list(request, Some(environment), Some(application)),
            [environment, application, check] => {
                self.execute(environment, application, check, &request.query)
                    .await
            }
            _ => EngineResponse::not_found(format!("No route for '{}'", request.path)),
        }
    }

    /// List mode: every (target, check, case) combination in scope that
    /// passes the cached applicability verdict and the request's tag filter
    fn list(
        &self,
        request: &EngineRequest,
        environment: Option<&str>,
        application: Option<&str>,
    ) -> EngineResponse {
        if request.method != RequestMethod::Get {
            return EngineResponse::method_not_allowed();
        }
        if let Some(env) = environment {
            if !self.targets.has_environment(env) {
                return EngineResponse::not_found(format!("Unknown environment '{}'", env));
            }
            if let Some(app) = application {
                if self.targets.get(env, app).is_none() {
                    return EngineResponse::not_found(format!(
                        "Unknown target '{}/{}'",
                        env, app
                    ));
                }
            }
        }

        // Query keys that are not declared parameters of any check act as a
        // tag filter; the rest would only matter at execution time.
        let param_names = self.checks.declared_param_names();
        let filter = TagFilter::from_pairs(
            request
                .query
                .iter()
                .filter(|(key, _)| !param_names.contains(key))
                .map(|(key, value)| (key.as_str(), value.as_str())),
        );

        let mut tests = Vec::new();
        for entry in self.targets.select(environment, application) {
            let target = entry.target();
            for check in self.checks.iter() {
                if !self.constraints.applicable(check, &target) {
                    continue;
                }
                if !filter.matches(check.tags()) {
                    continue;
                }
                let cases = self.cases.for_check(check.name());
                if cases.is_empty() {
                    tests.push(self.entry_for(check, &target, None));
                } else {
                    for case in cases {
                        tests.push(self.entry_for(check, &target, Some(case.params())));
                    }
                }
            }
        }
        tests.sort_by(|a, b| a.url.cmp(&b.url));

        match serde_json::to_value(TestList { tests }) {
            Ok(body) => EngineResponse::ok(body),
            Err(err) => EngineResponse {
                status: 500,
                body: json!({ "Message": err.to_string() }),
            },
        }
    }

    fn entry_for(
        &self,
        check: &crate::suite::CheckDef,
        target: &crate::target::Target,
        case: Option<&ParamSet>,
    ) -> TestEntry {
        let mut url = format!(
            "{}{}/{}/{}/{}",
            self.options.public_base.trim_end_matches('/'),
            self.options.check_root,
            target.environment(),
            target.application(),
            check.name()
        );
        if let Some(params) = case {
            if !params.is_empty() {
                url.push('?');
                url.push_str(params.canonical());
            }
        }

        let parameters = if check.params().is_empty() {
            None
        } else {
            let mut effective: BTreeMap<String, Value> = check
                .params()
                .iter()
                .map(|spec| (spec.name.clone(), spec.default.clone()))
                .collect();
            if let Some(params) = case {
                for (name, value) in params.pairs() {
                    effective.insert(name.clone(), value.clone());
                }
            }
            Some(effective)
        };

        TestEntry {
            name: check.name().to_string(),
            environment: target.environment().to_string(),
            application: target.application().to_string(),
            url,
            tags: if check.tags().is_empty() {
                None
            } else {
                Some(check.tags().to_vec())
            },
            parameters,
        }
    }

    /// Execute mode: re-check applicability, bind parameters, run any
    /// matching case setup, invoke, and report
    async fn execute(
        &self,
        environment: &str,
        application: &str,
        name: &str,
        query: &[(String, String)],
    ) -> EngineResponse {
        let Some(entry) = self.targets.get(environment, application) else {
            return EngineResponse::not_found(format!(
                "Unknown target '{}/{}'",
                environment, application
            ));
        };
        let Some(check) = self.checks.get(name) else {
            return EngineResponse::not_found(format!("Unknown test '{}'", name));
        };
        let target = entry.target();
        if !self.constraints.applicable(check, &target) {
            return EngineResponse::not_found(format!(
                "Test '{}' is not applicable to '{}/{}'",
                name, environment, application
            ));
        }

        // Bind every declared parameter: the query value when present and
        // coercible, the declared default otherwise.
        let mut args: HashMap<String, Value> = HashMap::new();
        let mut bound: Vec<(String, Value)> = Vec::new();
        for spec in check.params() {
            match query.iter().find(|(key, _)| key == &spec.name) {
                Some((_, raw)) => match spec.bind(raw) {
                    Ok(value) => {
                        args.insert(spec.name.clone(), value.clone());
                        bound.push((spec.name.clone(), value));
                    }
                    Err(err) => return EngineResponse::bad_request(err.to_string()),
                },
                None => {
                    args.insert(spec.name.clone(), spec.default.clone());
                }
            }
        }

        // A case matches when its canonical form equals that of the
        // explicitly bound query values, defaults excluded.
        let bound_canonical = ParamSet::new(bound);
        if let Some(case) = self.cases.matching(name, bound_canonical.canonical()) {
            case.run_setup();
        }

        let log = DiagnosticLog::new();
        let ctx = CheckContext::new(target.clone(), args, log.clone());
        let started = Instant::now();
        let result = check.invoke(ctx).await;
        let duration = started.elapsed().as_millis() as u64;

        let report = match result {
            Ok(outcome) => {
                info!(test = name, environment, application, duration, "test passed");
                ExecutionReport {
                    return_value: outcome.into_value(),
                    passed: true,
                    log: log.contents(),
                    exception: None,
                    duration,
                }
            }
            Err(failure) => {
                info!(test = name, environment, application, duration, "test failed");
                ExecutionReport {
                    return_value: Value::Null,
                    passed: false,
                    log: log.contents(),
                    exception: Some(failure.to_string()),
                    duration,
                }
            }
        };
        let status = if report.passed { 200 } else { 500 };
        match serde_json::to_value(&report) {
            Ok(body) => EngineResponse { status, body },
            Err(err) => EngineResponse {
                status: 500,
                body: json!({ "Message": err.to_string() }),
            },
        }
    }

    async fn dispatch_sensors(&self, request: &EngineRequest, rest: &str) -> EngineResponse {
        if request.method != RequestMethod::Get {
            return EngineResponse::method_not_allowed();
        }
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        match segments[..] {
            [] => self.sensor_overview().await,
            [name] => match self.sensors.read(name).await {
                Some(reading) => match serde_json::to_value(&reading) {
                    Ok(body) => EngineResponse::ok(body),
                    Err(err) => EngineResponse {
                        status: 500,
                        body: json!({ "Message": err.to_string() }),
                    },
                },
                None => EngineResponse::not_found(format!("Unknown sensor '{}'", name)),
            },
            _ => EngineResponse::not_found(format!("No route for '{}'", request.path)),
        }
    }

    /// Overview document: every sensor's value (or error) plus `_links`
    async fn sensor_overview(&self) -> EngineResponse {
        let base = format!(
            "{}{}",
            self.options.public_base.trim_end_matches('/'),
            self.options.sensor_root
        );
        let mut body = Map::new();
        let mut links = Map::new();
        links.insert("self".to_string(), json!({ "href": base }));
        for reading in self.sensors.read_all().await {
            links.insert(
                reading.name.clone(),
                json!({ "href": format!("{}/{}", base, reading.name) }),
            );
            let value = match reading.value {
                Some(value) => value,
                None => json!({ "Error": reading.error }),
            };
            body.insert(reading.name, value);
        }
        body.insert("_links".to_string(), Value::Object(links));
        EngineResponse::ok(Value::Object(body))
    }
}

/// Strip a configured root prefix from a path. Matches the bare root, the
/// root with a trailing slash, and any deeper path under it.
fn strip_root<'a>(path: &'a str, root: &str) -> Option<&'a str> {
    let root = root.trim_end_matches('/');
    let rest = path.strip_prefix(root)?;
    if rest.is_empty() {
        return Some("");
    }
    rest.starts_with('/').then_some(rest)
}
