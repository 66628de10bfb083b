//! Check compilation
//!
//! Suites are plain types registered with a factory and a set of named check
//! bodies. Registration compiles each body once into a boxed async invoker
//! with its parameter metadata, tags, and applicability predicates attached;
//! nothing is reflected over at call time. Heterogeneous body shapes (unit,
//! value, fallible, sync or async) are normalized through [`IntoOutcome`]
//! into a tagged [`Outcome`] at the same compilation step.

use crate::params::{literal, ParamSpec};
use crate::scope::{Resolver, ScopeError};
use crate::target::Target;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Boxed future produced by a compiled invoker
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Tagged result of a check body: unit-shaped or value-shaped
#[derive(Debug, Clone)]
pub enum Outcome {
    Unit,
    Value(Value),
}

impl Outcome {
    /// Wrap any serializable value
    pub fn value<T: serde::Serialize>(value: T) -> Result<Outcome, CheckFailure> {
        Ok(Outcome::Value(serde_json::to_value(value)?))
    }

    /// The wire form of this outcome
    pub fn into_value(self) -> Value {
        match self {
            Outcome::Unit => Value::Null,
            Outcome::Value(value) => value,
        }
    }
}

/// A failure raised inside a check body or while resolving its dependencies
#[derive(Debug, Error)]
#[error("{message}")]
pub struct CheckFailure {
    message: String,
}

impl CheckFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<ScopeError> for CheckFailure {
    fn from(err: ScopeError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for CheckFailure {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("failed to serialize return value: {}", err))
    }
}

impl From<crate::scope::ProbeError> for CheckFailure {
    fn from(err: crate::scope::ProbeError) -> Self {
        Self::new(err.to_string())
    }
}

/// Conversion of a body's return shape into the tagged outcome
pub trait IntoOutcome: Send + 'static {
    fn into_outcome(self) -> Result<Outcome, CheckFailure>;
}

impl IntoOutcome for () {
    fn into_outcome(self) -> Result<Outcome, CheckFailure> {
        Ok(Outcome::Unit)
    }
}

impl IntoOutcome for Outcome {
    fn into_outcome(self) -> Result<Outcome, CheckFailure> {
        Ok(self)
    }
}

impl IntoOutcome for Value {
    fn into_outcome(self) -> Result<Outcome, CheckFailure> {
        Ok(Outcome::Value(self))
    }
}

impl IntoOutcome for String {
    fn into_outcome(self) -> Result<Outcome, CheckFailure> {
        Ok(Outcome::Value(Value::String(self)))
    }
}

impl IntoOutcome for bool {
    fn into_outcome(self) -> Result<Outcome, CheckFailure> {
        Ok(Outcome::Value(Value::Bool(self)))
    }
}

impl<T: IntoOutcome> IntoOutcome for Result<T, CheckFailure> {
    fn into_outcome(self) -> Result<Outcome, CheckFailure> {
        self.and_then(IntoOutcome::into_outcome)
    }
}

/// Per-execution diagnostic sink. Each execution gets its own buffer, so
/// concurrent executions never observe each other's writes.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticLog {
    buffer: Arc<Mutex<String>>,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one line of diagnostic output
    pub fn write_line(&self, line: &str) {
        let mut buffer = self.buffer.lock().expect("diagnostic buffer poisoned");
        buffer.push_str(line);
        buffer.push('\n');
    }

    /// Accumulated output so far
    pub fn contents(&self) -> String {
        self.buffer
            .lock()
            .expect("diagnostic buffer poisoned")
            .clone()
    }
}

/// Everything a check body can see during one execution
pub struct CheckContext {
    target: Arc<Target>,
    args: HashMap<String, Value>,
    log: DiagnosticLog,
}

impl CheckContext {
    pub(crate) fn new(target: Arc<Target>, args: HashMap<String, Value>, log: DiagnosticLog) -> Self {
        Self { target, args, log }
    }

    /// The target this execution is scoped to
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Bound value of a parameter, `Null` when undeclared
    pub fn param(&self, name: &str) -> Value {
        self.args.get(name).cloned().unwrap_or(Value::Null)
    }

    /// Bound value rendered as its query literal
    pub fn param_str(&self, name: &str) -> String {
        literal(&self.param(name))
    }

    /// Bound integer value, if the parameter holds one
    pub fn param_i64(&self, name: &str) -> Option<i64> {
        self.args.get(name).and_then(Value::as_i64)
    }

    /// Write a line to this execution's diagnostic log
    pub fn log(&self, line: impl AsRef<str>) {
        self.log.write_line(line.as_ref());
    }

    /// Resolve a dependency from the target's scope
    pub fn resolve<T: std::any::Any + Send + Sync>(&self) -> Result<Arc<T>, ScopeError> {
        self.target.scope().resolve::<T>()
    }
}

type SuiteFactory<S> = Arc<dyn Fn(&Resolver<'_>) -> Result<S, ScopeError> + Send + Sync>;
type Invoker = Arc<dyn Fn(CheckContext) -> BoxFuture<Result<Outcome, CheckFailure>> + Send + Sync>;

/// Applicability predicate evaluated against the suite instance resolved for
/// a target; `Err` means the instance could not be resolved
pub(crate) type NamePred = Arc<dyn Fn(&Target, &str) -> Result<bool, ScopeError> + Send + Sync>;
pub(crate) type TargetPred = Arc<dyn Fn(&Target) -> Result<bool, ScopeError> + Send + Sync>;

/// Capability predicates attached to every check of a suite
#[derive(Clone, Default)]
pub(crate) struct ApplicabilitySet {
    pub environment: Option<NamePred>,
    pub application: Option<NamePred>,
    pub target: Option<TargetPred>,
}

impl ApplicabilitySet {
    pub fn is_empty(&self) -> bool {
        self.environment.is_none() && self.application.is_none() && self.target.is_none()
    }
}

/// A compiled check: unique name, owning suite, invoker, metadata
pub struct CheckDef {
    name: String,
    suite: String,
    params: Vec<ParamSpec>,
    tags: Vec<String>,
    invoker: Invoker,
    pub(crate) applicability: ApplicabilitySet,
}

impl std::fmt::Debug for CheckDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckDef")
            .field("name", &self.name)
            .field("suite", &self.suite)
            .field("params", &self.params.len())
            .field("tags", &self.tags)
            .finish()
    }
}

impl CheckDef {
    /// Process-unique name (collision-suffixed)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Short name of the owning suite type
    pub fn suite(&self) -> &str {
        &self.suite
    }

    /// Ordered parameter metadata
    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Tags attached to this check
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Run the compiled invoker for one execution
    pub fn invoke(&self, ctx: CheckContext) -> BoxFuture<Result<Outcome, CheckFailure>> {
        (self.invoker)(ctx)
    }
}

/// All compiled checks, indexed by unique name
#[derive(Default)]
pub struct CheckSet {
    checks: Vec<Arc<CheckDef>>,
    by_name: HashMap<String, usize>,
    name_counts: HashMap<String, usize>,
}

impl CheckSet {
    pub fn get(&self, name: &str) -> Option<&Arc<CheckDef>> {
        self.by_name.get(name).map(|index| &self.checks[*index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CheckDef>> {
        self.checks.iter()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Names declared as parameters by any check; used to split tag filters
    /// from parameter bindings in list-mode queries
    pub fn declared_param_names(&self) -> std::collections::HashSet<String> {
        self.checks
            .iter()
            .flat_map(|check| check.params.iter().map(|p| p.name.clone()))
            .collect()
    }

    fn add(
        &mut self,
        base_name: String,
        suite: String,
        params: Vec<ParamSpec>,
        tags: Vec<String>,
        invoker: Invoker,
        applicability: ApplicabilitySet,
    ) -> String {
        let seen = self.name_counts.entry(base_name.clone()).or_insert(0);
        let name = if *seen == 0 {
            base_name.clone()
        } else {
            format!("{}__{}", base_name, seen)
        };
        *seen += 1;

        let def = Arc::new(CheckDef {
            name: name.clone(),
            suite,
            params,
            tags,
            invoker,
            applicability,
        });
        self.by_name.insert(name.clone(), self.checks.len());
        self.checks.push(def);
        name
    }
}

struct PendingCheck {
    name: String,
    params: Vec<ParamSpec>,
    invoker: Invoker,
}

/// Registration surface for one suite type
pub struct SuiteBuilder<S> {
    factory: SuiteFactory<S>,
    suite_name: String,
    tags: Vec<String>,
    environment_pred: Option<Arc<dyn Fn(&S, &str) -> bool + Send + Sync>>,
    application_pred: Option<Arc<dyn Fn(&S, &str) -> bool + Send + Sync>>,
    target_pred: Option<Arc<dyn Fn(&S, &Target) -> bool + Send + Sync>>,
    pending: Vec<PendingCheck>,
}

impl<S: Send + Sync + 'static> SuiteBuilder<S> {
    pub(crate) fn new(factory: SuiteFactory<S>) -> Self {
        let suite_name = std::any::type_name::<S>()
            .rsplit("::")
            .next()
            .unwrap_or("suite")
            .to_string();
        Self {
            factory,
            suite_name,
            tags: Vec::new(),
            environment_pred: None,
            application_pred: None,
            target_pred: None,
            pending: Vec::new(),
        }
    }

    /// Attach a tag to every check in this suite
    pub fn tag(&mut self, tag: impl Into<String>) -> &mut Self {
        self.tags.push(tag.into());
        self
    }

    /// Gate this suite's checks by environment name
    pub fn applicable_to_environment<F>(&mut self, pred: F) -> &mut Self
    where
        F: Fn(&S, &str) -> bool + Send + Sync + 'static,
    {
        self.environment_pred = Some(Arc::new(pred));
        self
    }

    /// Gate this suite's checks by application name
    pub fn applicable_to_application<F>(&mut self, pred: F) -> &mut Self
    where
        F: Fn(&S, &str) -> bool + Send + Sync + 'static,
    {
        self.application_pred = Some(Arc::new(pred));
        self
    }

    /// Gate this suite's checks by the full target
    pub fn applicable_to_target<F>(&mut self, pred: F) -> &mut Self
    where
        F: Fn(&S, &Target) -> bool + Send + Sync + 'static,
    {
        self.target_pred = Some(Arc::new(pred));
        self
    }

    /// Register an async check body. The invoker is compiled here, once.
    pub fn check<F, Fut, R>(&mut self, name: &str, params: Vec<ParamSpec>, body: F) -> &mut Self
    where
        F: Fn(Arc<S>, CheckContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoOutcome,
    {
        let factory = self.factory.clone();
        let body = Arc::new(body);
        let invoker: Invoker = Arc::new(move |ctx: CheckContext| {
            let factory = factory.clone();
            let body = body.clone();
            Box::pin(async move {
                let instance = {
                    let resolver = ctx.target().scope().resolver();
                    factory(&resolver)?
                };
                body(Arc::new(instance), ctx).await.into_outcome()
            })
        });
        self.pending.push(PendingCheck {
            name: name.to_string(),
            params,
            invoker,
        });
        self
    }

    /// Register a synchronous check body
    pub fn check_sync<F, R>(&mut self, name: &str, params: Vec<ParamSpec>, body: F) -> &mut Self
    where
        F: Fn(Arc<S>, CheckContext) -> R + Send + Sync + 'static,
        R: IntoOutcome,
    {
        self.check(name, params, move |suite, ctx| {
            let result = body(suite, ctx);
            async move { result }
        })
    }

    /// Seal the suite into the check set, assigning collision-suffixed names
    pub(crate) fn finish(self, set: &mut CheckSet) {
        let applicability = ApplicabilitySet {
            environment: self
                .environment_pred
                .map(|pred| erase_name_pred(self.factory.clone(), pred)),
            application: self
                .application_pred
                .map(|pred| erase_name_pred(self.factory.clone(), pred)),
            target: self
                .target_pred
                .map(|pred| erase_target_pred(self.factory.clone(), pred)),
        };
        for pending in self.pending {
            set.add(
                pending.name,
                self.suite_name.clone(),
                pending.params,
                self.tags.clone(),
                pending.invoker,
                applicability.clone(),
            );
        }
    }
}

fn erase_name_pred<S: Send + Sync + 'static>(
    factory: SuiteFactory<S>,
    pred: Arc<dyn Fn(&S, &str) -> bool + Send + Sync>,
) -> NamePred {
    Arc::new(move |target: &Target, name: &str| {
        let resolver = target.scope().resolver();
        let instance = factory(&resolver)?;
        Ok(pred(&instance, name))
    })
}

fn erase_target_pred<S: Send + Sync + 'static>(
    factory: SuiteFactory<S>,
    pred: Arc<dyn Fn(&S, &Target) -> bool + Send + Sync>,
) -> TargetPred {
    Arc::new(move |target: &Target| {
        let resolver = target.scope().resolver();
        let instance = factory(&resolver)?;
        Ok(pred(&instance, target))
    })
}
