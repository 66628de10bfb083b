//! Target registry: (environment, application) pairs with lazy dependency scopes
//!
//! Registration is eager and fail-fast (absolute base URI, non-empty names);
//! construction of the target's dependency scope is lazy and happens at most
//! once even under concurrent first access. Keys are compared
//! case-insensitively throughout; the original casing is preserved for
//! display and URL building.

use crate::error::{EngineError, Result};
use crate::scope::{ProbeClient, Scope, ScopeBuilder};
use hyper::Uri;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Case-insensitive identity of a target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetKey {
    environment: String,
    application: String,
}

impl TargetKey {
    /// Build a key, lowercasing both parts
    pub fn new(environment: &str, application: &str) -> Self {
        Self {
            environment: environment.to_ascii_lowercase(),
            application: application.to_ascii_lowercase(),
        }
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn application(&self) -> &str {
        &self.application
    }
}

/// A constructed target: scope plus addressing metadata
pub struct Target {
    environment: String,
    application: String,
    base_address: Uri,
    scope: Scope,
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("environment", &self.environment)
            .field("application", &self.application)
            .field("base_address", &self.base_address)
            .finish()
    }
}

impl Target {
    /// Environment name, original casing
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Application name, original casing
    pub fn application(&self) -> &str {
        &self.application
    }

    /// Base address registered for this target
    pub fn base_address(&self) -> &Uri {
        &self.base_address
    }

    /// The target's dependency scope
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Identity key for this target
    pub fn key(&self) -> TargetKey {
        TargetKey::new(&self.environment, &self.application)
    }

    /// Serializable view of this target
    pub fn info(&self) -> schema::TargetInfo {
        schema::TargetInfo {
            environment: self.environment.clone(),
            application: self.application.clone(),
            base_address: self.base_address.to_string(),
        }
    }
}

type ConfigureFn = Arc<dyn Fn(&mut ScopeBuilder) + Send + Sync>;

/// Lazily constructed registry entry
pub struct TargetEntry {
    environment: String,
    application: String,
    base_address: Uri,
    configure: Option<ConfigureFn>,
    built: OnceLock<Arc<Target>>,
}

impl TargetEntry {
    /// The constructed target, building it on first access. `OnceLock`
    /// guarantees at-most-once construction under concurrent callers.
    pub fn target(&self) -> Arc<Target> {
        self.built
            .get_or_init(|| {
                debug!(
                    "constructing target scope for {}/{}",
                    self.environment, self.application
                );
                let mut builder = ScopeBuilder::new();
                if let Some(configure) = &self.configure {
                    configure(&mut builder);
                }
                if !builder.has::<ProbeClient>() {
                    let base = self.base_address.clone();
                    builder.register::<ProbeClient, _>(move |_| Ok(ProbeClient::new(base.clone())));
                }
                Arc::new(Target {
                    environment: self.environment.clone(),
                    application: self.application.clone(),
                    base_address: self.base_address.clone(),
                    scope: builder.build(),
                })
            })
            .clone()
    }
}

/// Registry of all configured targets
#[derive(Default)]
pub struct TargetRegistry {
    by_key: HashMap<TargetKey, Arc<TargetEntry>>,
    order: Vec<TargetKey>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a target. Validation failures are raised immediately.
    pub fn add(
        &mut self,
        environment: &str,
        application: &str,
        base_address: &str,
        configure: Option<ConfigureFn>,
    ) -> Result<()> {
        if environment.trim().is_empty() {
            return Err(EngineError::Configuration(
                "environment cannot be empty".to_string(),
            ));
        }
        if application.trim().is_empty() {
            return Err(EngineError::Configuration(
                "application cannot be empty".to_string(),
            ));
        }
        let uri: Uri = base_address.parse().map_err(|_| {
            EngineError::Configuration(format!(
                "Base address must be an absolute URI: '{}'",
                base_address
            ))
        })?;
        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(EngineError::Configuration(format!(
                "Base address must be an absolute URI: '{}'",
                base_address
            )));
        }

        let key = TargetKey::new(environment, application);
        if self.by_key.contains_key(&key) {
            return Err(EngineError::Configuration(format!(
                "target '{}/{}' is already registered",
                environment, application
            )));
        }

        let entry = Arc::new(TargetEntry {
            environment: environment.to_string(),
            application: application.to_string(),
            base_address: uri,
            configure,
            built: OnceLock::new(),
        });
        self.by_key.insert(key.clone(), entry);
        self.order.push(key);
        Ok(())
    }

    /// Look up a target entry by environment and application
    pub fn get(&self, environment: &str, application: &str) -> Option<&Arc<TargetEntry>> {
        self.by_key.get(&TargetKey::new(environment, application))
    }

    /// Whether any target is registered for the environment
    pub fn has_environment(&self, environment: &str) -> bool {
        let env = environment.to_ascii_lowercase();
        self.order.iter().any(|key| key.environment() == env)
    }

    /// Entries in registration order, optionally filtered by environment
    /// and application (case-insensitive)
    pub fn select(
        &self,
        environment: Option<&str>,
        application: Option<&str>,
    ) -> Vec<Arc<TargetEntry>> {
        let env = environment.map(str::to_ascii_lowercase);
        let app = application.map(str::to_ascii_lowercase);
        self.order
            .iter()
            .filter(|key| env.as_deref().map_or(true, |e| e == key.environment()))
            .filter(|key| app.as_deref().map_or(true, |a| a == key.application()))
            .filter_map(|key| self.by_key.get(key).cloned())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_relative_base_address_is_rejected_eagerly() {
        let mut registry = TargetRegistry::new();
        let err = registry
            .add("staging", "widgetapi", "/relative/path", None)
            .unwrap_err();
        assert!(
            err.to_string().contains("Base address must be an absolute URI"),
            "{}",
            err
        );
    }

    #[test]
    fn test_empty_names_are_rejected() {
        let mut registry = TargetRegistry::new();
        assert!(registry.add("", "app", "http://localhost:81", None).is_err());
        assert!(registry.add("env", " ", "http://localhost:81", None).is_err());
    }

    #[test]
    fn test_duplicate_key_is_rejected_case_insensitively() {
        let mut registry = TargetRegistry::new();
        registry
            .add("staging", "widgetapi", "http://localhost:81", None)
            .unwrap();
        let err = registry
            .add("Staging", "WidgetApi", "http://localhost:82", None)
            .unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut registry = TargetRegistry::new();
        registry
            .add("Staging", "WidgetApi", "http://localhost:81", None)
            .unwrap();
        let entry = registry.get("staging", "widgetapi").expect("entry");
        let target = entry.target();
        assert_eq!(target.environment(), "Staging");
        assert_eq!(target.application(), "WidgetApi");
        assert!(registry.has_environment("STAGING"));
    }

    #[test]
    fn test_default_probe_client_uses_base_address() {
        let mut registry = TargetRegistry::new();
        registry
            .add("staging", "widgetapi", "http://localhost:81", None)
            .unwrap();
        let target = registry.get("staging", "widgetapi").unwrap().target();
        let client = target.scope().resolve::<ProbeClient>().unwrap();
        assert_eq!(client.base_address().port_u16(), Some(81));
    }

    #[test]
    fn test_scope_configuration_overrides_default_client() {
        let mut registry = TargetRegistry::new();
        registry
            .add(
                "staging",
                "widgetapi",
                "http://localhost:81",
                Some(Arc::new(|builder: &mut ScopeBuilder| {
                    builder.register::<ProbeClient, _>(|_| {
                        Ok(ProbeClient::new("http://override:9999".parse().expect("uri")))
                    });
                })),
            )
            .unwrap();
        let target = registry.get("staging", "widgetapi").unwrap().target();
        let client = target.scope().resolve::<ProbeClient>().unwrap();
        assert_eq!(client.base_address().port_u16(), Some(9999));
    }

    #[test]
    fn test_construction_happens_at_most_once_under_concurrency() {
        static BUILDS: AtomicUsize = AtomicUsize::new(0);

        let mut registry = TargetRegistry::new();
        registry
            .add(
                "staging",
                "widgetapi",
                "http://localhost:81",
                Some(Arc::new(|_builder: &mut ScopeBuilder| {
                    BUILDS.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();
        let entry = registry.get("staging", "widgetapi").unwrap().clone();

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let entry = entry.clone();
                std::thread::spawn(move || entry.target())
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
    }
}
