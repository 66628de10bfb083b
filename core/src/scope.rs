//! Per-target dependency scope
//!
//! A scope is an explicit type-to-factory map. Resolution is depth-first with
//! cycle detection and memoizes constructed instances with an insert-or-get,
//! so a dependency is built at most once per scope even under concurrent
//! resolution. Factories receive a [`Resolver`] through which they pull their
//! own dependencies.
//!
//! Every scope built for a target is seeded with a default [`ProbeClient`]
//! bound to the target's base address, unless the target's own configuration
//! registered one.

use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request, Uri};
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

/// Errors raised while resolving from a scope
#[derive(Error, Debug, Clone)]
pub enum ScopeError {
    #[error("no factory registered for {0}")]
    Missing(&'static str),

    #[error("cyclic dependency while resolving {0}")]
    Cycle(&'static str),

    #[error("factory for {0} produced a value of a different type")]
    TypeMismatch(&'static str),
}

type Shared = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(&Resolver<'_>) -> Result<Shared, ScopeError> + Send + Sync>;
type Hook = Arc<dyn Fn(&Resolver<'_>) -> Result<(), ScopeError> + Send + Sync>;

/// Collects factories and post-construction hooks before a scope is sealed
#[derive(Default)]
pub struct ScopeBuilder {
    factories: HashMap<TypeId, (&'static str, Factory)>,
    hooks: Vec<Hook>,
}

impl ScopeBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `T`, replacing any previous registration
    pub fn register<T, F>(&mut self, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn(&Resolver<'_>) -> Result<T, ScopeError> + Send + Sync + 'static,
    {
        let erased: Factory = Arc::new(move |resolver| {
            factory(resolver).map(|value| Arc::new(value) as Shared)
        });
        self.factories
            .insert(TypeId::of::<T>(), (std::any::type_name::<T>(), erased));
    }

    /// Register an already-constructed instance of `T`
    pub fn register_instance<T: Any + Send + Sync>(&mut self, value: T) {
        let shared: Shared = Arc::new(value);
        let erased: Factory = Arc::new(move |_| Ok(shared.clone()));
        self.factories
            .insert(TypeId::of::<T>(), (std::any::type_name::<T>(), erased));
    }

    /// Whether a factory for `T` has been registered
    pub fn has<T: Any + Send + Sync>(&self) -> bool {
        self.factories.contains_key(&TypeId::of::<T>())
    }

    /// Add a hook that runs once after the scope is constructed
    pub fn after_build<F>(&mut self, hook: F)
    where
        F: Fn(&Resolver<'_>) -> Result<(), ScopeError> + Send + Sync + 'static,
    {
        self.hooks.push(Arc::new(hook));
    }

    /// Seal the builder into an immutable scope and run its hooks
    pub fn build(self) -> Scope {
        let scope = Scope {
            factories: self.factories,
            cache: Mutex::new(HashMap::new()),
        };
        for hook in &self.hooks {
            let resolver = scope.resolver();
            if let Err(e) = hook(&resolver) {
                // Hooks must never prevent the host from starting; failures
                // resurface when the dependency is resolved at run time.
                debug!("post-construction hook failed: {}", e);
            }
        }
        scope
    }
}

/// Immutable, shareable dependency scope
pub struct Scope {
    factories: HashMap<TypeId, (&'static str, Factory)>,
    cache: Mutex<HashMap<TypeId, Shared>>,
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("registrations", &self.factories.len())
            .finish()
    }
}

impl Scope {
    /// Resolve an instance of `T`, constructing it and its dependencies
    /// depth-first on first access
    pub fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>, ScopeError> {
        self.resolver().resolve::<T>()
    }

    /// Create a resolver rooted at this scope
    pub fn resolver(&self) -> Resolver<'_> {
        Resolver {
            scope: self,
            stack: RefCell::new(Vec::new()),
        }
    }
}

/// Resolution handle passed to factories; tracks the in-flight resolution
/// stack for cycle detection
pub struct Resolver<'a> {
    scope: &'a Scope,
    stack: RefCell<Vec<TypeId>>,
}

impl Resolver<'_> {
    /// Resolve an instance of `T` from the underlying scope
    pub fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>, ScopeError> {
        let id = TypeId::of::<T>();
        if let Some(hit) = self.scope.cache.lock().expect("scope cache poisoned").get(&id) {
            return hit
                .clone()
                .downcast::<T>()
                .map_err(|_| ScopeError::TypeMismatch(std::any::type_name::<T>()));
        }

        let (name, factory) = self
            .scope
            .factories
            .get(&id)
            .map(|(n, f)| (*n, f.clone()))
            .ok_or(ScopeError::Missing(std::any::type_name::<T>()))?;

        if self.stack.borrow().contains(&id) {
            return Err(ScopeError::Cycle(name));
        }
        self.stack.borrow_mut().push(id);
        let built = factory(self);
        self.stack.borrow_mut().pop();
        let built = built?;

        // Insert-or-get: a concurrent resolver may have won the race.
        let shared = self
            .scope
            .cache
            .lock()
            .expect("scope cache poisoned")
            .entry(id)
            .or_insert(built)
            .clone();
        shared
            .downcast::<T>()
            .map_err(|_| ScopeError::TypeMismatch(name))
    }
}

/// Default HTTP dependency seeded into every target scope
///
/// Wraps a hyper client bound to the target's base address so checks can
/// probe the application they are scoped to without knowing where it lives.
#[derive(Debug, Clone)]
pub struct ProbeClient {
    base: Uri,
    client: Client<HttpConnector>,
}

/// Errors raised by [`ProbeClient`] requests
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("invalid probe url: {0}")]
    Url(#[from] hyper::http::uri::InvalidUri),

    #[error(transparent)]
    Http(#[from] hyper::Error),

    #[error("failed to build probe request: {0}")]
    Request(#[from] hyper::http::Error),
}

impl ProbeClient {
    /// Create a client bound to an absolute base address
    pub fn new(base: Uri) -> Self {
        Self {
            base,
            client: Client::new(),
        }
    }

    /// Base address this client is bound to
    pub fn base_address(&self) -> &Uri {
        &self.base
    }

    /// GET a path relative to the base address, returning status and body
    pub async fn get(&self, path: &str) -> Result<(u16, String), ProbeError> {
        let base = self.base.to_string();
        let joined = format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let uri: Uri = joined.parse()?;
        let req = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())?;
        let response = self.client.request(req).await?;
        let status = response.status().as_u16();
        let bytes = hyper::body::to_bytes(response.into_body()).await?;
        Ok((status, String::from_utf8_lossy(&bytes).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Config {
        limit: usize,
    }

    #[derive(Debug)]
    struct Repository {
        config: Arc<Config>,
    }

    #[test]
    fn test_resolves_dependency_chain_depth_first() {
        let mut builder = ScopeBuilder::new();
        builder.register::<Config, _>(|_| Ok(Config { limit: 3 }));
        builder.register::<Repository, _>(|r| {
            Ok(Repository {
                config: r.resolve::<Config>()?,
            })
        });
        let scope = builder.build();

        let repo = scope.resolve::<Repository>().unwrap();
        assert_eq!(repo.config.limit, 3);
    }

    #[test]
    fn test_resolution_is_memoized() {
        let mut builder = ScopeBuilder::new();
        builder.register::<Config, _>(|_| Ok(Config { limit: 1 }));
        let scope = builder.build();

        let a = scope.resolve::<Config>().unwrap();
        let b = scope.resolve::<Config>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_missing_factory_names_type() {
        let scope = ScopeBuilder::new().build();
        let err = scope.resolve::<Repository>().unwrap_err();
        assert!(err.to_string().contains("Repository"), "{}", err);
    }

    #[test]
    fn test_cycle_detection() {
        #[derive(Debug)]
        struct A;
        struct B;
        let mut builder = ScopeBuilder::new();
        builder.register::<A, _>(|r| {
            r.resolve::<B>()?;
            Ok(A)
        });
        builder.register::<B, _>(|r| {
            r.resolve::<A>()?;
            Ok(B)
        });
        let scope = builder.build();

        let err = scope.resolve::<A>().unwrap_err();
        assert!(matches!(err, ScopeError::Cycle(_)));
    }

    #[test]
    fn test_hook_failure_does_not_poison_scope() {
        let mut builder = ScopeBuilder::new();
        builder.register::<Config, _>(|_| Ok(Config { limit: 9 }));
        builder.after_build(|r| r.resolve::<Repository>().map(|_| ()));
        let scope = builder.build();

        assert_eq!(scope.resolve::<Config>().unwrap().limit, 9);
    }

    #[test]
    fn test_probe_client_reports_base_address() {
        let client = ProbeClient::new("http://localhost:81".parse().unwrap());
        assert_eq!(client.base_address().to_string(), "http://localhost:81/");
    }
}
