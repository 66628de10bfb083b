//! Parameterized case registry
//!
//! Cases are literal argument sets registered against a check at
//! configuration time. Argument values are captured eagerly, canonicalized,
//! and deduplicated by canonical string: the first registration wins and
//! later registrations with an equal canonical form are ignored. A check with
//! at least one case is listed once per case instead of once with defaults.

use crate::params::ParamSet;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

type SetupFn = Arc<dyn Fn() + Send + Sync>;

/// One registered case: its parameter set and optional setup callback
#[derive(Clone)]
pub struct Case {
    params: ParamSet,
    setup: Option<SetupFn>,
}

impl Case {
    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    /// Run the setup callback, if one was registered
    pub fn run_setup(&self) {
        if let Some(setup) = &self.setup {
            setup();
        }
    }
}

impl std::fmt::Debug for Case {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Case")
            .field("params", &self.params.canonical())
            .field("has_setup", &self.setup.is_some())
            .finish()
    }
}

/// Cases keyed by check name, in registration order per check
#[derive(Default)]
pub struct CaseRegistry {
    by_check: HashMap<String, Vec<Case>>,
}

impl CaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a case. Values are captured now; an equal canonical string
    /// under the same check is ignored.
    pub fn register(
        &mut self,
        check: &str,
        values: impl IntoIterator<Item = (String, Value)>,
        setup: Option<SetupFn>,
    ) {
        let params = ParamSet::new(values);
        let cases = self.by_check.entry(check.to_string()).or_default();
        if cases.iter().any(|c| c.params == params) {
            debug!(
                "duplicate case '{}' for check '{}' ignored",
                params.canonical(),
                check
            );
            return;
        }
        cases.push(Case { params, setup });
    }

    /// Registered cases for a check, in registration order
    pub fn for_check(&self, check: &str) -> &[Case] {
        self.by_check.get(check).map_or(&[], Vec::as_slice)
    }

    /// The case whose canonical string matches the bound query parameters
    pub fn matching(&self, check: &str, canonical: &str) -> Option<&Case> {
        self.for_check(check)
            .iter()
            .find(|case| case.params.canonical() == canonical)
    }
}
