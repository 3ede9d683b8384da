//! Live image stream from the vehicle camera.
pub mod image_link;
pub mod photo;

pub use image_link::DatagramImageLink;
pub use photo::PhotoArchive;
