//! Field-level checks used by [`HubConfig::validate`](crate::config::HubConfig::validate).
//!
//! Each check returns a short static reason; the caller adds the field name.

use std::net::IpAddr;
use std::ops::RangeInclusive;

/// Log levels accepted by `application.log_level`.
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Rejects port 0, which would let the OS pick one at random.
pub fn is_valid_port(port: u16) -> Result<(), &'static str> {
    if port > 0 {
        Ok(())
    } else {
        Err("port number must be greater than 0")
    }
}

/// Accepts IPv4 and IPv6 literals only; host names are not resolved.
pub fn is_valid_ip(ip: &str) -> Result<(), &'static str> {
    ip.parse::<IpAddr>()
        .map(|_| ())
        .map_err(|_| "invalid IP address")
}

/// Non-empty and free of NUL bytes.
pub fn is_valid_path(path: &str) -> Result<(), &'static str> {
    if path.is_empty() {
        return Err("path cannot be empty");
    }
    if path.contains('\0') {
        return Err("path cannot contain null bytes");
    }
    Ok(())
}

/// Periods and delays must be strictly positive.
pub fn is_nonzero_ms(ms: u64) -> Result<(), &'static str> {
    if ms > 0 {
        Ok(())
    } else {
        Err("duration must be greater than 0 ms")
    }
}

/// Serial rates between 300 and 4 Mbaud.
pub fn is_valid_baud(baud: u32) -> Result<(), &'static str> {
    is_in_range(baud, 300..=4_000_000).map_err(|_| "baud rate must be within 300..=4000000")
}

/// Value within an inclusive range.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err("value is outside the allowed range")
    }
}

/// One of [`LOG_LEVELS`], case-insensitive.
pub fn is_valid_log_level(level: &str) -> Result<(), &'static str> {
    if LOG_LEVELS.iter().any(|l| l.eq_ignore_ascii_case(level)) {
        Ok(())
    } else {
        Err("log level must be one of trace, debug, info, warn, error")
    }
}
