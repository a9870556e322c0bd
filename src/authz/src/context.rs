//! Request-scoped security context
//!
//! One [`SecurityContext`] lives for one request on one thread. It holds the
//! principal, the flattened role set, the authorization-suspension flag and the
//! set of queries that already received a filter. Interior mutability is
//! `Cell`/`RefCell`, which keeps the type `!Sync`.

use crate::error::{AuthzError, Result};
use crate::policy::PolicyIndex;
use crate::synth::OperandResolver;
use crate::types::{Principal, RoleId};
use serde_json::Value;
use std::cell::{Cell, OnceCell, RefCell};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Produces the value of a global object for the current request
pub type GlobalObjectProvider = Arc<dyn Fn(&SecurityContext) -> Result<Value> + Send + Sync>;

/// Registry of objects reachable as `context.<name>` from rules
#[derive(Clone, Default)]
pub struct GlobalObjects {
    providers: HashMap<String, GlobalObjectProvider>,
}

impl GlobalObjects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `context.user` bound to the request principal
    pub fn standard() -> Self {
        Self::new().with("user", |context: &SecurityContext| {
            let principal = context.principal().ok_or_else(|| AuthzError::GlobalObjectResolution {
                object: "user".to_string(),
                reason: "no principal is attached to the request".to_string(),
            })?;
            Ok(serde_json::to_value(principal)?)
        })
    }

    pub fn register<F>(&mut self, name: impl Into<String>, provider: F)
    where
        F: Fn(&SecurityContext) -> Result<Value> + Send + Sync + 'static,
    {
        self.providers.insert(name.into(), Arc::new(provider));
    }

    pub fn with<F>(mut self, name: impl Into<String>, provider: F) -> Self
    where
        F: Fn(&SecurityContext) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(name, provider);
        self
    }

    pub fn get(&self, name: &str) -> Option<&GlobalObjectProvider> {
        self.providers.get(name)
    }
}

impl fmt::Debug for GlobalObjects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.providers.keys().collect();
        names.sort();
        f.debug_struct("GlobalObjects").field("providers", &names).finish()
    }
}

/// Identifier of an outgoing query
pub type QueryId = Uuid;

/// Per-request authorization state
pub struct SecurityContext {
    principal: RefCell<Option<Principal>>,
    initialized: Cell<bool>,
    suspended: Cell<bool>,
    roles: OnceCell<BTreeSet<RoleId>>,
    filtered: RefCell<HashSet<QueryId>>,
    globals: GlobalObjects,
}

impl SecurityContext {
    /// Context for a request whose principal is known
    pub fn new(principal: Principal, globals: GlobalObjects) -> Self {
        let context = Self::bootstrap(globals);
        context.attach_principal(principal);
        context
    }

    /// Context created before authentication data is available
    pub fn bootstrap(globals: GlobalObjects) -> Self {
        Self {
            principal: RefCell::new(None),
            initialized: Cell::new(false),
            suspended: Cell::new(false),
            roles: OnceCell::new(),
            filtered: RefCell::new(HashSet::new()),
            globals,
        }
    }

    /// Make the principal available; the context becomes initializable
    pub fn attach_principal(&self, principal: Principal) {
        *self.principal.borrow_mut() = Some(principal);
    }

    pub fn principal(&self) -> Option<Principal> {
        self.principal.borrow().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.get()
    }

    pub fn can_be_initialized(&self) -> bool {
        self.principal.borrow().is_some()
    }

    /// Initialize once a principal is attached; repeated calls are no-ops
    pub fn initialize(&self) -> bool {
        if !self.initialized.get() && self.can_be_initialized() {
            self.initialized.set(true);
            debug!("Security context initialized");
        }
        self.initialized.get()
    }

    /// Flattened roles of the principal, computed on first use
    pub fn active_roles(&self, index: &PolicyIndex) -> Result<&BTreeSet<RoleId>> {
        if let Some(roles) = self.roles.get() {
            return Ok(roles);
        }
        let principal = self.principal().ok_or_else(|| {
            AuthzError::InvalidPolicy("roles requested before a principal was attached".to_string())
        })?;
        let roles = index.roles_for(&principal)?;
        Ok(self.roles.get_or_init(|| roles))
    }

    pub fn are_authorization_checks_disabled(&self) -> bool {
        self.suspended.get()
    }

    /// Suspend checks until the returned guard is dropped
    pub fn suspend_authorization(&self) -> AuthorizationSuspension<'_> {
        let previous = self.suspended.replace(true);
        AuthorizationSuspension { context: self, previous }
    }

    /// Run `f` with authorization checks suspended
    pub fn without_authorization_checks<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.suspend_authorization();
        f()
    }

    /// Record that a query received its filter; false if it already had
    pub fn mark_filtered(&self, query: QueryId) -> bool {
        self.filtered.borrow_mut().insert(query)
    }

    pub fn is_filtered(&self, query: QueryId) -> bool {
        self.filtered.borrow().contains(&query)
    }

    pub fn globals(&self) -> &GlobalObjects {
        &self.globals
    }
}

impl fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityContext")
            .field("principal", &self.principal.borrow().as_ref().map(|p| p.id.clone()))
            .field("initialized", &self.initialized.get())
            .field("suspended", &self.suspended.get())
            .finish()
    }
}

/// Restores the previous suspension state on drop
#[must_use = "checks are restored as soon as the guard is dropped"]
pub struct AuthorizationSuspension<'a> {
    context: &'a SecurityContext,
    previous: bool,
}

impl Drop for AuthorizationSuspension<'_> {
    fn drop(&mut self) {
        self.context.suspended.set(self.previous);
    }
}

impl OperandResolver for SecurityContext {
    fn resolve_global(&self, object: &str, path: &str) -> Result<Value> {
        let provider = self.globals.get(object).ok_or_else(|| AuthzError::GlobalObjectResolution {
            object: object.to_string(),
            reason: "no global object registered under this name".to_string(),
        })?;

        // Providers may query the store themselves
        let root = self.without_authorization_checks(|| provider(self))?;
        lookup_path(&root, path).map_err(|reason| AuthzError::GlobalObjectResolution {
            object: object.to_string(),
            reason,
        })
    }
}

/// Follow a dotted path; absent properties resolve to null
fn lookup_path(root: &Value, path: &str) -> std::result::Result<Value, String> {
    let mut current = root;
    for segment in path.split('.').filter(|segment| !segment.is_empty()) {
        current = match current {
            Value::Object(map) => match map.get(segment) {
                Some(value) => value,
                None => return Ok(Value::Null),
            },
            Value::Array(items) => {
                let index: usize = segment
                    .parse()
                    .map_err(|_| format!("\"{}\" is not a list index", segment))?;
                match items.get(index) {
                    Some(value) => value,
                    None => return Ok(Value::Null),
                }
            }
            Value::Null => return Ok(Value::Null),
            scalar => return Err(format!("cannot read \"{}\" of scalar {}", segment, scalar)),
        };
    }
    Ok(current.clone())
}
