//! # ROV Hub Core Library
//!
//! Shore-side aggregation layer for a towed underwater vehicle. Telemetry arrives
//! concurrently from the vehicle controller, the camera controller, a latency probe,
//! auto-discovered serial instruments on the boat and a datagram image stream. All
//! of it lands in one [`SharedState`](state::SharedState) that display, logging and
//! recording components read from and occasionally write into.
//!
//! ## Crate Structure
//!
//! - **`protocol`**: the bracket-delimited frame codec (`<key:value:...>`) and the
//!   typed operator command vocabulary.
//! - **`state`**: the shared store: typed channels, bounded histories, the serial
//!   device registry, sticky emergency mode and change subscribers.
//! - **`mapping`**: per-device tables from remote keys to store channels.
//! - **`link`**: auto-reconnecting request/response links and the latency probe.
//! - **`serial`**: port discovery, device fingerprinting and serial ingestion.
//! - **`video`**: the datagram image link and the still-photo archive.
//! - **`scheduler`**: fixed-rate polling of the links.
//! - **`hub`**: wires everything together from a [`HubConfig`](config::HubConfig).
//! - **`config`**, **`logging`**, **`error`**, **`validation`**: ambient plumbing.

pub mod config;
pub mod error;
pub mod hub;
pub mod link;
pub mod logging;
pub mod mapping;
pub mod protocol;
pub mod scheduler;
pub mod serial;
pub mod state;
pub mod validation;
pub mod video;

pub use config::HubConfig;
pub use error::{AppResult, HubError};
pub use hub::Hub;
pub use state::SharedState;
