//! Reply format shared by the atomic scripts and the limiter.
//!
//! A script replies with `"<0|1>,<wait>"`: the decision flag (1 allows) and a
//! wait hint in ticks. Internal to this crate; not a stable external format.

use crate::clock::TICKS_PER_SECOND;
use crate::error::{RateLimitError, Result};
use crate::store::ScriptState;

/// Parsed output of one atomic evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScriptReply {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Wait hint in ticks; only meaningful when denied
    pub wait_ticks: f64,
}

impl ScriptReply {
    /// Render in wire form.
    pub fn encode(&self) -> String {
        format!("{},{}", u8::from(self.allowed), self.wait_ticks)
    }

    /// Parse a raw script reply.
    pub fn parse(raw: &str) -> Result<Self> {
        let (flag, wait) = raw
            .split_once(',')
            .ok_or_else(|| protocol_error(raw, "expected two comma-separated fields"))?;

        let allowed = match flag.trim() {
            "1" => true,
            "0" => false,
            _ => return Err(protocol_error(raw, "decision flag must be 0 or 1")),
        };

        let wait_ticks: f64 = wait
            .trim()
            .parse()
            .map_err(|_| protocol_error(raw, "wait value is not a number"))?;
        if !wait_ticks.is_finite() || wait_ticks < 0.0 {
            return Err(protocol_error(raw, "wait value must be finite and non-negative"));
        }

        Ok(Self {
            allowed,
            wait_ticks,
        })
    }

    /// Wait hint converted to seconds.
    pub fn wait_seconds(&self) -> f64 {
        self.wait_ticks / TICKS_PER_SECOND as f64
    }
}

fn protocol_error(raw: &str, reason: &str) -> RateLimitError {
    RateLimitError::Protocol(format!("{}: {:?}", reason, raw))
}

/// Split script keys into (counter, timestamp).
pub(crate) fn counter_and_timestamp(keys: &[String]) -> Result<(&str, &str)> {
    match keys {
        [counter, timestamp] => Ok((counter.as_str(), timestamp.as_str())),
        _ => Err(RateLimitError::Protocol(format!(
            "script expects 2 keys, got {}",
            keys.len()
        ))),
    }
}

/// Parse the integer script argument at `index`.
pub(crate) fn int_arg(args: &[String], index: usize, name: &str) -> Result<i64> {
    let raw = args.get(index).ok_or_else(|| {
        RateLimitError::Protocol(format!("missing script argument {} ({})", index + 1, name))
    })?;
    raw.parse().map_err(|_| {
        RateLimitError::Protocol(format!("script argument {} is not an integer: {:?}", name, raw))
    })
}

/// Read an integer previously stored under `key`, if any.
pub(crate) fn stored_int(state: &dyn ScriptState, key: &str) -> Result<Option<i64>> {
    match state.get(key) {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| {
            RateLimitError::Protocol(format!("stored value under {} is not an integer: {:?}", key, raw))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_allow() {
        let reply = ScriptReply::parse("1,0").unwrap();
        assert!(reply.allowed);
        assert_eq!(reply.wait_ticks, 0.0);
    }

    #[test]
    fn test_parse_deny_with_wait() {
        let reply = ScriptReply::parse("0,20000000").unwrap();
        assert!(!reply.allowed);
        assert_eq!(reply.wait_seconds(), 2.0);
    }

    #[test]
    fn test_parse_fractional_and_exponent_waits() {
        // Lua renders numbers with %.14g
        let reply = ScriptReply::parse("0,3333333.3333333").unwrap();
        assert!((reply.wait_seconds() - 1.0 / 3.0).abs() < 1e-9);

        let reply = ScriptReply::parse("0,2.592e+14").unwrap();
        assert_eq!(reply.wait_seconds(), 25_920_000.0);
    }

    #[test]
    fn test_encode_matches_parse() {
        let reply = ScriptReply {
            allowed: false,
            wait_ticks: 20_000_000.0,
        };
        assert_eq!(reply.encode(), "0,20000000");
        assert_eq!(ScriptReply::parse(&reply.encode()).unwrap(), reply);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for raw in ["", "1", "2,5", "yes,0", "1,abc", "1,", "0,-5", "0,inf", "1,0,0"] {
            let err = ScriptReply::parse(raw).unwrap_err();
            assert!(
                matches!(err, RateLimitError::Protocol(_)),
                "{:?} should be a protocol error",
                raw
            );
        }
    }

    #[test]
    fn test_counter_and_timestamp() {
        let keys = vec!["a".to_string(), "b".to_string()];
        assert_eq!(counter_and_timestamp(&keys).unwrap(), ("a", "b"));
        assert!(counter_and_timestamp(&keys[..1]).is_err());
    }

    #[test]
    fn test_int_arg() {
        let args = vec!["10".to_string(), "x".to_string()];
        assert_eq!(int_arg(&args, 0, "now").unwrap(), 10);
        assert!(int_arg(&args, 1, "window").is_err());
        assert!(int_arg(&args, 2, "capacity").is_err());
    }
}
