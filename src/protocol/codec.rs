//! Frame encoding and decoding.
//!
//! Decoding takes the first `<` and the first `>` after it; everything in between is
//! split on `:` and paired in order. Delimiters do not nest, so the first closing
//! bracket always terminates the frame. An odd trailing token has no value to pair
//! with and is left out of the pairs; it is reported through [`Frame::trailing`] so
//! the caller can log it.

use crate::error::{AppResult, HubError};

/// Opens a frame.
pub const START_DELIMITER: char = '<';
/// Closes a frame.
pub const END_DELIMITER: char = '>';
/// Separates tokens inside a frame.
pub const SEPARATOR: char = ':';

/// An ordered sequence of key/value pairs decoded from one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pairs: Vec<(String, String)>,
    trailing: Option<String>,
}

impl Frame {
    /// Build a frame from already-paired tokens.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            trailing: None,
        }
    }

    /// Pairs in the order they appeared on the wire.
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Iterate over `(key, value)` borrowed pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Iterate over keys only.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(k, _)| k.as_str())
    }

    /// First value recorded for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// The unpaired last token of an odd-length frame, if there was one.
    pub fn trailing(&self) -> Option<&str> {
        self.trailing.as_deref()
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// True when the frame carried no pairs.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Consume the frame into its pairs.
    pub fn into_pairs(self) -> Vec<(String, String)> {
        self.pairs
    }
}

/// Wrap a command string in frame delimiters: `ping` becomes `<ping>`.
pub fn encode(command: &str) -> String {
    format!("{START_DELIMITER}{command}{END_DELIMITER}")
}

/// True when `raw` holds a start delimiter followed somewhere by an end delimiter.
pub fn has_frame(raw: &str) -> bool {
    frame_body(raw).is_some()
}

/// Decode the first frame found in `raw`.
///
/// # Errors
/// Returns [`HubError::FormatFault`] if `raw` lacks a `<`, or lacks a `>` after it.
pub fn decode(raw: &str) -> AppResult<Frame> {
    let body = frame_body(raw).ok_or_else(|| {
        HubError::FormatFault(format!(
            "missing frame delimiters in '{}'",
            raw.trim().escape_default()
        ))
    })?;

    let mut tokens = body.split(SEPARATOR);
    let mut pairs = Vec::new();
    let mut trailing = None;

    while let Some(key) = tokens.next() {
        match tokens.next() {
            Some(value) => pairs.push((key.to_string(), value.to_string())),
            None => {
                // An empty body ("<>") splits into one empty token; that is not data.
                if !key.is_empty() {
                    trailing = Some(key.to_string());
                }
            }
        }
    }

    Ok(Frame { pairs, trailing })
}

fn frame_body(raw: &str) -> Option<&str> {
    let start = raw.find(START_DELIMITER)? + START_DELIMITER.len_utf8();
    let len = raw[start..].find(END_DELIMITER)?;
    Some(&raw[start..start + len])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_pairs_in_order() {
        let frame = decode("<a:b:c:d>").unwrap();
        assert_eq!(
            frame.pairs(),
            &[
                ("a".to_string(), "b".to_string()),
                ("c".to_string(), "d".to_string())
            ]
        );
        assert!(frame.trailing().is_none());
    }

    #[test]
    fn decodes_imu_sample() {
        let frame = decode("<Roll:12.5:Pitch:-3.2>").unwrap();
        assert_eq!(frame.get("Roll"), Some("12.5"));
        assert_eq!(frame.get("Pitch"), Some("-3.2"));
        assert_eq!(frame.keys().collect::<Vec<_>>(), vec!["Roll", "Pitch"]);
    }

    #[test]
    fn rejects_text_without_delimiters() {
        assert!(matches!(
            decode("no brackets here"),
            Err(HubError::FormatFault(_))
        ));
        assert!(matches!(decode("<Roll:1"), Err(HubError::FormatFault(_))));
        assert!(matches!(decode("Roll:1>"), Err(HubError::FormatFault(_))));
        // closing bracket before the opening one does not count
        assert!(matches!(decode(">Roll:1<"), Err(HubError::FormatFault(_))));
    }

    #[test]
    fn odd_token_is_dropped_and_reported() {
        let frame = decode("<a:1:b>").unwrap();
        assert_eq!(frame.len(), 1);
        assert_eq!(frame.get("a"), Some("1"));
        assert_eq!(frame.trailing(), Some("b"));
    }

    #[test]
    fn first_closing_delimiter_terminates() {
        let frame = decode("noise<a:<1>:b:2>").unwrap();
        assert_eq!(frame.pairs(), &[("a".to_string(), "<1".to_string())]);
    }

    #[test]
    fn empty_frame_has_no_pairs() {
        let frame = decode("<>").unwrap();
        assert!(frame.is_empty());
        assert!(frame.trailing().is_none());
    }

    #[test]
    fn encode_wraps_in_delimiters() {
        assert_eq!(encode("fb_allData"), "<fb_allData>");
        assert_eq!(encode("cmd_pid_p:1.5"), "<cmd_pid_p:1.5>");
        assert!(has_frame(&encode("x")));
        assert!(!has_frame("x>"));
    }
}
