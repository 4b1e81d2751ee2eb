//! Dispatch registry: dotted `Namespace.method` names mapped to local handlers.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use ctxbridge_envelope::{is_reserved, Outcome};
use futures_core::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, trace};

use crate::config::HandlerConfig;
use crate::error::{PeerError, Result};
use crate::marshal::{marshal, HandlerError};

/// A locally registered function servicing one message name.
///
/// Implemented for every `Fn(Vec<Value>) -> impl Future<Output =
/// Result<Value, HandlerError>>`; wrap synchronous functions with
/// [`sync_handler`].
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, args: Vec<Value>) -> BoxFuture<'static, std::result::Result<Value, HandlerError>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, HandlerError>> + Send + 'static,
{
    fn handle(&self, args: Vec<Value>) -> BoxFuture<'static, std::result::Result<Value, HandlerError>> {
        Box::pin(self(args))
    }
}

/// Adapt a synchronous function into a [`Handler`].
///
/// The function runs when the returned future is first polled.
pub fn sync_handler<F>(f: F) -> impl Handler
where
    F: Fn(Vec<Value>) -> std::result::Result<Value, HandlerError> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    move |args: Vec<Value>| {
        let f = Arc::clone(&f);
        async move { f(args) }
    }
}

/// A handler and its configuration.
#[derive(Clone)]
pub struct Registration {
    handler: Arc<dyn Handler>,
    config: HandlerConfig,
}

impl Registration {
    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Run the handler-side pipeline: pad, `pre_receive`, handler, `pre_send`.
    ///
    /// Failures and panics anywhere in the pipeline become a marshaled
    /// [`Outcome::Failure`].
    pub async fn invoke(&self, name: &str, mut args: Vec<Value>) -> Outcome {
        if args.len() < self.config.min_args {
            args.resize(self.config.min_args, Value::Null);
        }

        let pipeline = async {
            let args = self.config.hooks.apply_pre_receive(args).await?;
            let value = self.handler.handle(args).await?;
            self.config.hooks.apply_pre_send(value).await
        };

        let result = match AssertUnwindSafe(pipeline).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(HandlerError::from_panic(panic)),
        };

        match result {
            Ok(value) => Outcome::Success(value),
            Err(err) => {
                debug!(name = %name, error = %err, "handler failed");
                Outcome::Failure(marshal(err, name))
            }
        }
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Result of dispatching one request to a registered handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub outcome: Outcome,
    pub expects_response: bool,
    pub large_payload: bool,
}

/// Maps dotted `Namespace.method` names to local handlers.
#[derive(Default)]
pub struct DispatchRegistry {
    entries: RwLock<HashMap<String, Registration>>,
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or overwrite the handler for `name`.
    pub fn register(
        &self,
        name: impl Into<String>,
        handler: impl Handler,
        config: HandlerConfig,
    ) -> Result<()> {
        let name = name.into();
        if is_reserved(&name) {
            return Err(PeerError::ReservedName(name));
        }
        let registration = Registration {
            handler: Arc::new(handler),
            config,
        };
        if self.entries.write().insert(name.clone(), registration).is_some() {
            debug!(name = %name, "handler replaced");
        } else {
            trace!(name = %name, "handler registered");
        }
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<Registration> {
        self.entries.read().get(name).cloned()
    }

    /// Invoke the handler for `name`. Unknown names yield `None`.
    pub async fn dispatch(&self, name: &str, args: Vec<Value>) -> Option<Dispatched> {
        let registration = self.lookup(name)?;
        let outcome = registration.invoke(name, args).await;
        Some(Dispatched {
            outcome,
            expects_response: registration.config.expects_response,
            large_payload: registration.config.large_payload,
        })
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every registration. Only used on channel teardown.
    pub(crate) fn clear(&self) {
        self.entries.write().clear();
    }
}

impl std::fmt::Debug for DispatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchRegistry")
            .field("names", &self.names())
            .finish()
    }
}
