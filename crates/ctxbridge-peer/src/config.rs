use std::time::Duration;

use ctxbridge_envelope::{DEFAULT_MAX_CHUNKS, DEFAULT_TAG};

use crate::transform::{CallHooks, HandlerHooks};

/// Per-channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Name used in log fields.
    pub label: String,
    /// Protocol tag; channels sharing a transport use distinct tags.
    pub tag: String,
    /// How long `connect` waits for the remote ready signal.
    pub handshake_timeout: Duration,
    /// Timeout for calls that do not set their own.
    pub call_timeout: Duration,
    /// Size ceiling for the large-payload path. `None` takes the transport's.
    pub max_message_size: Option<usize>,
    /// Most slices one chunked transfer may use.
    pub max_chunks: usize,
    /// `<major>.<minor>`; peers must share the major version.
    pub protocol_version: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            label: "channel".to_string(),
            tag: DEFAULT_TAG.to_string(),
            handshake_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(5 * 60),
            max_message_size: None,
            max_chunks: DEFAULT_MAX_CHUNKS,
            protocol_version: "1.0".to_string(),
        }
    }
}

/// How long a call may stay pending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CallTimeout {
    /// Use [`ChannelConfig::call_timeout`].
    #[default]
    Default,
    After(Duration),
    /// Wait until the call settles or the channel goes away.
    Never,
}

impl CallTimeout {
    pub(crate) fn resolve(self, default: Duration) -> Option<Duration> {
        match self {
            CallTimeout::Default => Some(default),
            CallTimeout::After(after) => Some(after),
            CallTimeout::Never => None,
        }
    }
}

/// Caller-side options for one message name.
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// `false` sends without a correlation id and resolves immediately.
    pub expects_response: bool,
    pub timeout: CallTimeout,
    /// The request may exceed the transport ceiling.
    pub large_payload: bool,
    /// Re-send instead of rejecting when the remote endpoint restarts.
    pub replay_on_restart: bool,
    pub hooks: CallHooks,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            expects_response: true,
            timeout: CallTimeout::Default,
            large_payload: false,
            replay_on_restart: false,
            hooks: CallHooks::default(),
        }
    }
}

impl CallOptions {
    pub fn fire_and_forget() -> Self {
        Self {
            expects_response: false,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, after: Duration) -> Self {
        self.timeout = CallTimeout::After(after);
        self
    }

    pub fn without_timeout(mut self) -> Self {
        self.timeout = CallTimeout::Never;
        self
    }

    pub fn large_payload(mut self) -> Self {
        self.large_payload = true;
        self
    }

    pub fn replay_on_restart(mut self) -> Self {
        self.replay_on_restart = true;
        self
    }

    pub fn with_hooks(mut self, hooks: CallHooks) -> Self {
        self.hooks = hooks;
        self
    }
}

/// Handler-side configuration for one message name.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// `false` discards the handler's result.
    pub expects_response: bool,
    /// Arguments are padded with `null` up to this count.
    pub min_args: usize,
    /// The response may exceed the transport ceiling.
    pub large_payload: bool,
    pub hooks: HandlerHooks,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            expects_response: true,
            min_args: 0,
            large_payload: false,
            hooks: HandlerHooks::default(),
        }
    }
}

impl HandlerConfig {
    pub fn no_response() -> Self {
        Self {
            expects_response: false,
            ..Self::default()
        }
    }

    pub fn min_args(mut self, min_args: usize) -> Self {
        self.min_args = min_args;
        self
    }

    pub fn large_payload(mut self) -> Self {
        self.large_payload = true;
        self
    }

    pub fn with_hooks(mut self, hooks: HandlerHooks) -> Self {
        self.hooks = hooks;
        self
    }
}
