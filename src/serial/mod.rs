//! Serial devices on the boat: discovery, fingerprinting and ingestion.
pub mod classifier;
pub mod fingerprint;
pub mod ingest;
pub mod port;

pub use classifier::{DiscoveryReport, PortCandidate, PortClassifier};
pub use fingerprint::{fingerprint, Fingerprint};
pub use ingest::SerialIngest;
pub use port::{SerialIo, SerialOpener, SystemSerial};
