//! Per-message transform hooks.
//!
//! Caller side: `pre_send` adapts arguments before encoding, `post_receive`
//! rebuilds the result after decoding. Handler side: `pre_receive` adapts
//! arguments before the handler runs, `pre_send` adapts its result before it
//! travels back. A missing hook passes values through unchanged.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_core::future::BoxFuture;
use serde_json::Value;

use crate::marshal::HandlerError;

/// Hook over an argument list.
pub type ArgsHook =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Vec<Value>, HandlerError>> + Send + Sync>;

/// Hook over a single value.
pub type ValueHook =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, HandlerError>> + Send + Sync>;

/// Wrap an async function as an [`ArgsHook`].
pub fn args_hook<F, Fut>(f: F) -> ArgsHook
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Value>, HandlerError>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)))
}

/// Wrap an async function as a [`ValueHook`].
pub fn value_hook<F, Fut>(f: F) -> ValueHook
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    Arc::new(move |value| Box::pin(f(value)))
}

async fn run_args(hook: Option<&ArgsHook>, args: Vec<Value>) -> Result<Vec<Value>, HandlerError> {
    match hook {
        Some(hook) => hook(args).await,
        None => Ok(args),
    }
}

async fn run_value(hook: Option<&ValueHook>, value: Value) -> Result<Value, HandlerError> {
    match hook {
        Some(hook) => hook(value).await,
        None => Ok(value),
    }
}

/// Caller-side hooks for one message name.
#[derive(Clone, Default)]
pub struct CallHooks {
    pub pre_send: Option<ArgsHook>,
    pub post_receive: Option<ValueHook>,
}

impl CallHooks {
    pub fn with_pre_send(mut self, hook: ArgsHook) -> Self {
        self.pre_send = Some(hook);
        self
    }

    pub fn with_post_receive(mut self, hook: ValueHook) -> Self {
        self.post_receive = Some(hook);
        self
    }

    pub(crate) async fn apply_pre_send(&self, args: Vec<Value>) -> Result<Vec<Value>, HandlerError> {
        run_args(self.pre_send.as_ref(), args).await
    }

    pub(crate) async fn apply_post_receive(&self, value: Value) -> Result<Value, HandlerError> {
        run_value(self.post_receive.as_ref(), value).await
    }
}

impl fmt::Debug for CallHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallHooks")
            .field("pre_send", &self.pre_send.is_some())
            .field("post_receive", &self.post_receive.is_some())
            .finish()
    }
}

/// Handler-side hooks for one message name.
#[derive(Clone, Default)]
pub struct HandlerHooks {
    pub pre_receive: Option<ArgsHook>,
    pub pre_send: Option<ValueHook>,
}

impl HandlerHooks {
    pub fn with_pre_receive(mut self, hook: ArgsHook) -> Self {
        self.pre_receive = Some(hook);
        self
    }

    pub fn with_pre_send(mut self, hook: ValueHook) -> Self {
        self.pre_send = Some(hook);
        self
    }

    pub(crate) async fn apply_pre_receive(
        &self,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, HandlerError> {
        run_args(self.pre_receive.as_ref(), args).await
    }

    pub(crate) async fn apply_pre_send(&self, value: Value) -> Result<Value, HandlerError> {
        run_value(self.pre_send.as_ref(), value).await
    }
}

impl fmt::Debug for HandlerHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerHooks")
            .field("pre_receive", &self.pre_receive.is_some())
            .field("pre_send", &self.pre_send.is_some())
            .finish()
    }
}
