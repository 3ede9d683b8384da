//! Network links to the vehicle: request/response stream links and the latency probe.
pub mod ping;
pub mod state;
pub mod stream;

pub use ping::{PingLink, UNREACHABLE_MS};
pub use state::{LinkState, LinkStatus, Transition};
pub use stream::{Response, StreamLink};
