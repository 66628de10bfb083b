//! Core engine for the Spica project
//!
//! Spica exposes diagnostic checks over HTTP, scoped to (environment,
//! application) targets, alongside ungated read-only sensors. This crate is
//! the engine itself: check compilation, target scopes, applicability
//! constraints, parameterized cases, request dispatch, and sensor reads. The
//! thin HTTP shim lives in the `daemon` crate; any host with a request
//! surface can embed [`Engine`] directly.
//!
//! Operating assumption: targets, checks, cases and sensors are fixed once
//! the engine starts serving (it is consumed into an `Arc` by its host), so
//! the applicability and target caches are valid for the process lifetime
//! and have no invalidation path.

pub mod cases;
pub mod constraint;
pub mod dispatch;
pub mod error;
pub mod params;
pub mod scope;
pub mod sensor;
pub mod suite;
pub mod target;
pub mod warmup;

pub use dispatch::{EngineRequest, EngineResponse, RequestMethod};
pub use error::{EngineError, Result};
pub use params::{ParamKind, ParamSet, ParamSpec};
pub use scope::{ProbeClient, ProbeError, Resolver, Scope, ScopeBuilder, ScopeError};
pub use sensor::{Sensor, SensorFailure, SensorSet};
pub use suite::{
    CheckContext, CheckDef, CheckFailure, DiagnosticLog, IntoOutcome, Outcome, SuiteBuilder,
};
pub use target::{Target, TargetKey, TargetRegistry};
pub use warmup::WarmupTracker;

use cases::CaseRegistry;
use constraint::ConstraintCache;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use suite::CheckSet;

/// Roots and addressing used when serving and when building listing URLs
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Path prefix under which checks are exposed
    pub check_root: String,
    /// Path prefix under which sensors are exposed
    pub sensor_root: String,
    /// Externally visible base URL for listing URLs
    pub public_base: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            check_root: "/tests".to_string(),
            sensor_root: "/sensors".to_string(),
            public_base: "http://localhost:8181".to_string(),
        }
    }
}

/// The check engine: registration surface plus dispatch
///
/// Configure with `&mut self` methods, then share behind an `Arc` and feed
/// requests to [`Engine::dispatch`].
pub struct Engine {
    pub(crate) options: EngineOptions,
    pub(crate) targets: TargetRegistry,
    pub(crate) checks: CheckSet,
    pub(crate) cases: CaseRegistry,
    pub(crate) constraints: ConstraintCache,
    pub(crate) sensors: SensorSet,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("options", &self.options)
            .field("checks", &self.checks.len())
            .finish()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineOptions::default())
    }
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            targets: TargetRegistry::new(),
            checks: CheckSet::default(),
            cases: CaseRegistry::new(),
            constraints: ConstraintCache::new(),
            sensors: SensorSet::new(),
        }
    }

    /// Register a target with the default dependency scope
    ///
    /// # Errors
    /// Returns a configuration error immediately when the environment or
    /// application is empty or the base address is not an absolute URI.
    pub fn add_target(&mut self, environment: &str, application: &str, base: &str) -> Result<()> {
        self.targets.add(environment, application, base, None)
    }

    /// Register a target whose dependency scope is customized by `configure`
    ///
    /// # Errors
    /// Same validation as [`Engine::add_target`].
    pub fn add_target_with<C>(
        &mut self,
        environment: &str,
        application: &str,
        base: &str,
        configure: C,
    ) -> Result<()>
    where
        C: Fn(&mut ScopeBuilder) + Send + Sync + 'static,
    {
        self.targets
            .add(environment, application, base, Some(Arc::new(configure)))
    }

    /// Register a check suite: a factory for its instance plus its checks
    /// and capabilities
    pub fn suite<S, F, C>(&mut self, factory: F, configure: C)
    where
        S: Send + Sync + 'static,
        F: Fn(&Resolver<'_>) -> std::result::Result<S, ScopeError> + Send + Sync + 'static,
        C: FnOnce(&mut SuiteBuilder<S>),
    {
        let mut builder = SuiteBuilder::new(Arc::new(factory));
        configure(&mut builder);
        builder.finish(&mut self.checks);
    }

    /// Register a parameterized case for a check
    ///
    /// # Errors
    /// Returns a configuration error when the check name is unknown.
    pub fn case(
        &mut self,
        check: &str,
        values: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<()> {
        self.register_case(check, values, None)
    }

    /// Register a parameterized case with a setup callback that runs before
    /// each matching execution
    ///
    /// # Errors
    /// Returns a configuration error when the check name is unknown.
    pub fn case_with_setup<F>(
        &mut self,
        check: &str,
        values: impl IntoIterator<Item = (String, Value)>,
        setup: F,
    ) -> Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.register_case(check, values, Some(Arc::new(setup)))
    }

    fn register_case(
        &mut self,
        check: &str,
        values: impl IntoIterator<Item = (String, Value)>,
        setup: Option<Arc<dyn Fn() + Send + Sync>>,
    ) -> Result<()> {
        if self.checks.get(check).is_none() {
            return Err(EngineError::Configuration(format!(
                "cannot register case for unknown check '{}'",
                check
            )));
        }
        self.cases.register(check, values, setup);
        Ok(())
    }

    /// Register an async closure as a sensor
    pub fn sensor<F, Fut, T>(&mut self, name: &str, declaring: &str, read: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, SensorFailure>> + Send + 'static,
        T: serde::Serialize + Send + 'static,
    {
        self.sensors.register(name, declaring, read);
    }

    /// Mutable access to the sensor set for trait-object registrations
    pub fn sensors_mut(&mut self) -> &mut SensorSet {
        &mut self.sensors
    }

    /// Engine options in effect
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }
}
