//! Link state and restart detection.
//!
//! ```text
//! Uninitialized -> Handshaking -> Ready -> Degraded -> Handshaking -> Ready
//!                                   any state -> Closed (terminal)
//! ```

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::control::ReadySignal;
use crate::error::{PeerError, Result};

/// Where a channel is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Uninitialized,
    Handshaking,
    /// Both ends are listening; application calls are permitted.
    Ready,
    /// The remote endpoint restarted; the link is being re-established.
    Degraded,
    Closed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LinkState::Uninitialized => "uninitialized",
            LinkState::Handshaking => "handshaking",
            LinkState::Ready => "ready",
            LinkState::Degraded => "degraded",
            LinkState::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// What a received ready signal means for this channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Observation {
    /// First signal from the remote endpoint; the link is now ready.
    FirstContact { reply: bool },
    /// Same remote instance as before.
    Duplicate { reply: bool },
    /// A different remote instance: the endpoint restarted.
    Restarted { reply: bool },
    /// The channel is closed.
    Ignored,
}

pub(crate) struct Liveness {
    state: watch::Sender<LinkState>,
    remote: Mutex<Option<String>>,
    failure: Mutex<Option<String>>,
}

impl Liveness {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(LinkState::Uninitialized);
        Self {
            state,
            remote: Mutex::new(None),
            failure: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    pub(crate) fn remote_instance(&self) -> Option<String> {
        self.remote.lock().clone()
    }

    /// Move to `next` unless closed. Returns whether the state changed.
    pub(crate) fn set(&self, next: LinkState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == LinkState::Closed || *state == next {
                return false;
            }
            *state = next;
            true
        })
    }

    /// Enter the terminal state. Returns `false` if already closed.
    pub(crate) fn close(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == LinkState::Closed {
                return false;
            }
            *state = LinkState::Closed;
            true
        })
    }

    /// Close because the remote endpoint cannot be talked to.
    pub(crate) fn fail(&self, reason: String) -> bool {
        self.failure.lock().get_or_insert(reason);
        self.close()
    }

    pub(crate) fn observe(&self, signal: &ReadySignal) -> Observation {
        if self.state() == LinkState::Closed {
            return Observation::Ignored;
        }
        let reply = !signal.ack;
        let mut remote = self.remote.lock();
        match remote.as_deref() {
            None => {
                *remote = Some(signal.instance.clone());
                drop(remote);
                self.set(LinkState::Ready);
                Observation::FirstContact { reply }
            }
            Some(known) if known == signal.instance => Observation::Duplicate { reply },
            Some(_) => {
                *remote = Some(signal.instance.clone());
                drop(remote);
                self.set(LinkState::Degraded);
                Observation::Restarted { reply }
            }
        }
    }

    /// Wait until the link is ready, closed, or `timeout` elapses.
    pub(crate) async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.state.subscribe();
        let reached = tokio::time::timeout(
            timeout,
            rx.wait_for(|state| matches!(state, LinkState::Ready | LinkState::Closed)),
        )
        .await;
        match reached {
            Err(_) => Err(PeerError::HandshakeTimeout(timeout)),
            Ok(Err(_)) => Err(PeerError::ChannelClosed),
            Ok(Ok(state)) if *state == LinkState::Ready => Ok(()),
            Ok(Ok(_)) => match self.failure.lock().clone() {
                Some(reason) => Err(PeerError::HandshakeFailed(reason)),
                None => Err(PeerError::ChannelClosed),
            },
        }
    }
}
