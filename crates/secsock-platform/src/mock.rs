//! Mock collaborators for testing.
//!
//! Deterministic, in-memory stand-ins for the credential provider, event
//! router and operation registry. Key material uses the real [`Keyring`]
//! since it has no external dependencies.
//!
//! [`Keyring`]: crate::keyring::Keyring

use crate::error::{Error, Result};
use crate::traits::{AfterHook, CredentialProvider, EventRouter, Invocation, OperationRegistry, Phase};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

/// Mock credential provider.
///
/// Clones share the same token, so a test can log in or out after handing a
/// clone to the engine.
///
/// # Example
///
/// ```
/// use secsock_platform::mock::MockCredentials;
/// use secsock_platform::traits::CredentialProvider;
///
/// let credentials = MockCredentials::with_token("abc");
/// assert_eq!(credentials.query_token().as_deref(), Some("abc"));
///
/// credentials.set_token(None);
/// assert!(credentials.query_token().is_none());
/// ```
#[derive(Clone, Default)]
pub struct MockCredentials {
    token: Arc<RwLock<Option<String>>>,
}

impl MockCredentials {
    /// Logged-out provider.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Provider holding `token`.
    pub fn with_token(token: impl Into<String>) -> Self {
        let credentials = Self::default();
        credentials.set_token(Some(token.into()));
        credentials
    }

    /// Replace the current token.
    pub fn set_token(&self, token: Option<String>) {
        if let Ok(mut current) = self.token.write() {
            *current = token;
        }
    }
}

impl CredentialProvider for MockCredentials {
    fn query_token(&self) -> Option<String> {
        self.token.read().ok().and_then(|token| token.clone())
    }
}

/// A recorded `check_post_events` call.
#[derive(Debug, Clone, PartialEq)]
pub struct PostEvent {
    /// Process whose hooks ran.
    pub process: String,
    /// Output handed to the hooks.
    pub output: Option<Value>,
    /// Scope restriction, if any.
    pub scope: Option<String>,
}

/// Mock event router.
///
/// Allows every operation unless told otherwise, keeps `set_after` hooks so a
/// test can [`fire`](MockEventRouter::fire) them, and records post events.
#[derive(Default)]
pub struct MockEventRouter {
    denied: RwLock<HashSet<(String, Phase)>>,
    failing: RwLock<HashSet<String>>,
    hooks: Mutex<HashMap<String, Vec<(String, AfterHook)>>>,
    post_events: Mutex<Vec<PostEvent>>,
}

impl MockEventRouter {
    /// Router that allows everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make middlewares disallow `process` in `phase`.
    pub fn deny(&self, process: &str, phase: Phase) {
        if let Ok(mut denied) = self.denied.write() {
            denied.insert((process.to_string(), phase));
        }
    }

    /// Make post events for `process` report a failing hook.
    pub fn fail_post_events(&self, process: &str) {
        if let Ok(mut failing) = self.failing.write() {
            failing.insert(process.to_string());
        }
    }

    /// Number of hooks registered for `event`.
    pub fn hook_count(&self, event: &str) -> usize {
        self.hooks
            .lock()
            .map(|hooks| hooks.get(event).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Scopes of the hooks registered for `event`, in registration order.
    pub fn hook_scopes(&self, event: &str) -> Vec<String> {
        self.hooks
            .lock()
            .map(|hooks| {
                hooks
                    .get(event)
                    .map(|list| list.iter().map(|(scope, _)| scope.clone()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Run every hook registered for `event`. Returns how many ran.
    pub async fn fire(&self, event: &str) -> usize {
        let hooks: Vec<AfterHook> = match self.hooks.lock() {
            Ok(hooks) => hooks
                .get(event)
                .map(|list| list.iter().map(|(_, hook)| Arc::clone(hook)).collect())
                .unwrap_or_default(),
            Err(_) => return 0,
        };

        for hook in &hooks {
            hook().await;
        }
        hooks.len()
    }

    /// Recorded post events.
    pub fn post_events(&self) -> Vec<PostEvent> {
        self.post_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventRouter for MockEventRouter {
    async fn run_middlewares(&self, process: &str, _invocation: &Invocation, phase: Phase) -> bool {
        self.denied
            .read()
            .map(|denied| !denied.contains(&(process.to_string(), phase)))
            .unwrap_or(true)
    }

    fn set_after(&self, event: &str, hook: AfterHook, scope: &str) {
        if let Ok(mut hooks) = self.hooks.lock() {
            hooks
                .entry(event.to_string())
                .or_default()
                .push((scope.to_string(), hook));
        }
    }

    async fn check_post_events(
        &self,
        process: &str,
        output: Option<&Value>,
        scope: Option<&str>,
    ) -> Result<()> {
        if let Ok(mut events) = self.post_events.lock() {
            events.push(PostEvent {
                process: process.to_string(),
                output: output.cloned(),
                scope: scope.map(str::to_string),
            });
        }

        let failing = self
            .failing
            .read()
            .map(|failing| failing.contains(process))
            .unwrap_or(false);
        if failing {
            return Err(Error::PostEvent {
                process: process.to_string(),
                index: 0,
            });
        }
        Ok(())
    }
}

type OperationFn =
    dyn Fn(&Invocation, Value) -> core::result::Result<Option<Value>, String> + Send + Sync;

/// Mock operation registry backed by closures.
#[derive(Default)]
pub struct MockOperations {
    operations: RwLock<HashMap<String, Arc<OperationFn>>>,
    calls: Mutex<Vec<Invocation>>,
}

impl MockOperations {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`. An `Err` from `operation` becomes `Error::Operation`.
    pub fn register<F>(&self, name: &str, operation: F)
    where
        F: Fn(&Invocation, Value) -> core::result::Result<Option<Value>, String>
            + Send
            + Sync
            + 'static,
    {
        if let Ok(mut operations) = self.operations.write() {
            operations.insert(name.to_string(), Arc::new(operation));
        }
    }

    /// Contexts of every call, in order.
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    fn lookup(&self, name: &str) -> Option<Arc<OperationFn>> {
        self.operations
            .read()
            .ok()
            .and_then(|operations| operations.get(name).cloned())
    }
}

#[async_trait]
impl OperationRegistry for MockOperations {
    fn exists(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    async fn call(&self, name: &str, context: &Invocation, body: Value) -> Result<Option<Value>> {
        let operation = self
            .lookup(name)
            .ok_or_else(|| Error::UnknownOperation(name.to_string()))?;

        if let Ok(mut calls) = self.calls.lock() {
            calls.push(context.clone());
        }

        operation(context, body).map_err(|reason| Error::Operation {
            name: name.to_string(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_with_token() {
        let credentials = MockCredentials::with_token("t0k3n");
        assert_eq!(credentials.query_token().as_deref(), Some("t0k3n"));
    }

    #[test]
    fn test_exists_after_register() {
        let operations = MockOperations::new();
        assert!(!operations.exists("echo"));

        operations.register("echo", |_ctx, body| Ok(Some(body)));
        assert!(operations.exists("echo"));
    }

    #[tokio::test]
    async fn test_failing_post_events() {
        let router = MockEventRouter::new();
        router.fail_post_events("sum");

        let result = router.check_post_events("sum", Some(&json!(1)), None).await;
        assert!(matches!(result, Err(Error::PostEvent { index: 0, .. })));
        assert!(router.check_post_events("other", None, None).await.is_ok());
    }
}
