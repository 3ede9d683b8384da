//! The bracket-delimited wire protocol shared by every link.
//!
//! A frame looks like `<key1:value1:key2:value2>`: ASCII, one frame per line (stream
//! links) or per read (serial devices), tokens separated by `:` and read pairwise.
//! [`codec`] turns raw text into [`Frame`]s and back; [`command`] holds the typed
//! operator vocabulary that is encoded onto the stream and datagram links.
pub mod codec;
pub mod command;

pub use codec::{decode, encode, has_frame, Frame, END_DELIMITER, SEPARATOR, START_DELIMITER};
pub use command::{Command, ControlMessage, TargetMode};
