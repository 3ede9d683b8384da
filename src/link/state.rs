//! Connection state machine shared by the stream and ping links.
//!
//! ```text
//!                ┌──── connect failed ────┐
//!                ▼                        │
//! Disconnected ──retry delay──> Connecting ──connected──> Connected
//!                                  ▲                          │
//!                                  │                      I/O fault
//!                                  │                          ▼
//!                                  └──────retry delay────── Faulted
//! ```

use std::fmt;
use tokio::sync::{broadcast, watch};
use tracing::debug;

/// State of one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// No socket; waiting for the retry delay to elapse.
    Disconnected,
    /// Connect attempt in flight.
    Connecting,
    /// Socket open; requests are served.
    Connected,
    /// The open socket failed and has been dropped.
    Faulted,
}

impl LinkState {
    /// True only for [`LinkState::Connected`].
    #[must_use]
    pub fn is_connected(self) -> bool {
        self == LinkState::Connected
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LinkState::Disconnected => "Disconnected",
            LinkState::Connecting => "Connecting",
            LinkState::Connected => "Connected",
            LinkState::Faulted => "Faulted",
        };
        f.write_str(label)
    }
}

/// One state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Previous state.
    pub from: LinkState,
    /// New state.
    pub to: LinkState,
}

const TRANSITION_BACKLOG: usize = 64;

/// Current state plus a stream of transitions.
#[derive(Debug)]
pub struct LinkStatus {
    name: String,
    current: watch::Sender<LinkState>,
    transitions: broadcast::Sender<Transition>,
}

impl LinkStatus {
    /// Starts out [`LinkState::Disconnected`].
    pub fn new(name: impl Into<String>) -> Self {
        let (current, _) = watch::channel(LinkState::Disconnected);
        let (transitions, _) = broadcast::channel(TRANSITION_BACKLOG);
        Self {
            name: name.into(),
            current,
            transitions,
        }
    }

    /// Current state.
    pub fn get(&self) -> LinkState {
        *self.current.borrow()
    }

    /// Move to `next`, publishing the transition if the state changed.
    pub(crate) fn set(&self, next: LinkState) -> LinkState {
        let previous = self.current.send_replace(next);
        if previous != next {
            debug!(link = %self.name, from = %previous, to = %next, "Link state changed");
            // no receivers is fine
            let _ = self.transitions.send(Transition {
                from: previous,
                to: next,
            });
        }
        previous
    }

    /// Follow the latest state.
    pub fn watch(&self) -> watch::Receiver<LinkState> {
        self.current.subscribe()
    }

    /// Every transition from now on, in order.
    pub fn transitions(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }
}
