//! Token bucket ("throttle").
//!
//! The bucket starts full at `capacity` tokens and gains `refill_rate` tokens
//! for every whole second since the last refill. Each request takes one token.
//! Partial seconds never produce tokens; they carry over until a whole second
//! has accumulated.

use super::key::{validate_key, AlgorithmKind};
use super::protocol::{counter_and_timestamp, int_arg, stored_int, ScriptReply};
use super::request::{ensure_positive, LimitRequest, ThrottleRequest, ThrottleResult};
use crate::clock::{Ticks, TICKS_PER_SECOND};
use crate::error::Result;
use crate::store::{AtomicScript, ScriptState};

// KEYS: tokens, last refill. ARGV: refill rate (tokens/s), capacity.
// Timestamps are handled as in the fixed window script.
const LUA: &str = r#"
redis.replicate_commands()

local function ticksNow()
    local t = redis.call('TIME')
    return t[1] .. string.format('%06d', tonumber(t[2])) .. '0'
end

local function ticksBetween(later, earlier)
    local l = math.max(string.len(later) - 7, 0)
    local e = math.max(string.len(earlier) - 7, 0)
    local seconds = (tonumber(string.sub(later, 1, l)) or 0) - (tonumber(string.sub(earlier, 1, e)) or 0)
    return seconds * 10000000 + (tonumber(string.sub(later, l + 1)) - tonumber(string.sub(earlier, e + 1)))
end

local nowStr = ticksNow()
local refillRate = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local tokens = capacity
local lastStr = nowStr
local allowed = 1

local tokensStr = redis.call('GET', KEYS[1])
if tokensStr then
    tokens = tonumber(tokensStr)
end

local storedLast = redis.call('GET', KEYS[2])
if storedLast then
    lastStr = storedLast
end

local elapsed = ticksBetween(nowStr, lastStr)
if elapsed < 0 then
    elapsed = 0
end

local tokensToAdd = math.floor(elapsed / 10000000) * refillRate
tokens = tokens + tokensToAdd
if tokensToAdd > 0 then
    lastStr = nowStr
end

if tokens > capacity then
    tokens = capacity
end

tokens = tokens - 1
if tokens < 0 then
    allowed = 0
    tokens = 0
end

redis.call('SET', KEYS[1], tokens)
redis.call('SET', KEYS[2], lastStr)

return allowed .. ',' .. (10000000 / refillRate)
"#;

static SCRIPT: AtomicScript = AtomicScript::new("throttle", LUA, apply);

/// Persisted state of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketState {
    /// Tokens currently available, within `[0, capacity]`
    pub tokens: i64,
    /// When tokens were last added
    pub last_refill: Ticks,
}

/// Apply one request to a bucket.
///
/// The wait hint on denial is the time until the next single-token refill,
/// not the time until the bucket reaches any particular level. A `now` earlier
/// than the last refill adds nothing and leaves the refill time in place.
pub fn transition(
    previous: BucketState,
    now: Ticks,
    refill_rate: i64,
    capacity: i64,
) -> (BucketState, ScriptReply) {
    let elapsed_seconds = now
        .get()
        .saturating_sub(previous.last_refill.get())
        .max(0)
        / TICKS_PER_SECOND;
    let tokens_to_add = elapsed_seconds.saturating_mul(refill_rate);

    let last_refill = if tokens_to_add > 0 {
        now
    } else {
        previous.last_refill
    };
    let available = previous.tokens.saturating_add(tokens_to_add).min(capacity);

    let remaining = available - 1;
    let allowed = remaining >= 0;
    let next = BucketState {
        tokens: remaining.max(0),
        last_refill,
    };
    let reply = ScriptReply {
        allowed,
        wait_ticks: TICKS_PER_SECOND as f64 / refill_rate as f64,
    };
    (next, reply)
}

fn apply(state: &mut dyn ScriptState, keys: &[String], args: &[String]) -> Result<String> {
    let (tokens_key, refill_key) = counter_and_timestamp(keys)?;
    let now = state.now();
    let refill_rate = int_arg(args, 0, "refill rate")?;
    let capacity = int_arg(args, 1, "capacity")?;

    let previous = BucketState {
        tokens: stored_int(state, tokens_key)?.unwrap_or(capacity),
        last_refill: stored_int(state, refill_key)?.map(Ticks).unwrap_or(now),
    };
    let (next, reply) = transition(previous, now, refill_rate, capacity);

    state.set(tokens_key, next.tokens.to_string());
    state.set(refill_key, next.last_refill.to_string());
    Ok(reply.encode())
}

impl LimitRequest for ThrottleRequest {
    type Outcome = ThrottleResult;

    const KIND: AlgorithmKind = AlgorithmKind::Throttle;

    fn key(&self) -> &str {
        &self.key
    }

    fn validate(&self) -> Result<()> {
        validate_key(&self.key)?;
        ensure_positive("capacity", self.capacity)?;
        ensure_positive("refill_rate", self.refill_rate)?;
        Ok(())
    }

    fn script() -> &'static AtomicScript {
        &SCRIPT
    }

    fn script_args(&self) -> Result<Vec<String>> {
        Ok(vec![self.refill_rate.to_string(), self.capacity.to_string()])
    }

    fn outcome(reply: ScriptReply) -> ThrottleResult {
        ThrottleResult {
            allowed: reply.allowed,
            retry_after: if reply.allowed {
                0.0
            } else {
                reply.wait_seconds()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RateLimitError;
    use std::collections::HashMap;

    const SECOND: i64 = TICKS_PER_SECOND;

    struct MapState {
        entries: HashMap<String, String>,
        now: Ticks,
    }

    impl MapState {
        fn at(now: i64) -> Self {
            Self {
                entries: HashMap::new(),
                now: Ticks(now),
            }
        }
    }

    impl ScriptState for MapState {
        fn get(&self, key: &str) -> Option<String> {
            self.entries.get(key).cloned()
        }

        fn set(&mut self, key: &str, value: String) {
            self.entries.insert(key.to_string(), value);
        }

        fn now(&self) -> Ticks {
            self.now
        }
    }

    fn bucket(tokens: i64, last_refill: i64) -> BucketState {
        BucketState {
            tokens,
            last_refill: Ticks(last_refill),
        }
    }

    #[test]
    fn test_consumes_one_token() {
        let (next, reply) = transition(bucket(3, 0), Ticks(0), 1, 3);
        assert!(reply.allowed);
        assert_eq!(next, bucket(2, 0));
    }

    #[test]
    fn test_last_token_allowed_then_denied() {
        let (next, reply) = transition(bucket(1, 0), Ticks(SECOND / 2), 1, 5);
        assert!(reply.allowed);
        assert_eq!(next.tokens, 0);

        let (next, reply) = transition(next, Ticks(SECOND / 2 + 1), 1, 5);
        assert!(!reply.allowed);
        assert_eq!(next.tokens, 0);
        assert_eq!(reply.wait_ticks, SECOND as f64);
    }

    #[test]
    fn test_partial_seconds_do_not_refill() {
        let (next, reply) = transition(bucket(0, 0), Ticks(SECOND - 1), 10, 10);
        assert!(!reply.allowed);
        // Timestamp untouched so the partial second keeps accumulating
        assert_eq!(next.last_refill, Ticks(0));
    }

    #[test]
    fn test_whole_seconds_refill_and_advance_timestamp() {
        let now = Ticks(2 * SECOND + SECOND / 2);
        let (next, reply) = transition(bucket(0, 0), now, 3, 10);
        assert!(reply.allowed);
        assert_eq!(next.tokens, 5);
        assert_eq!(next.last_refill, now);
    }

    #[test]
    fn test_refill_clamped_to_capacity() {
        let (next, reply) = transition(bucket(1, 0), Ticks(3_600 * SECOND), 100, 4);
        assert!(reply.allowed);
        assert_eq!(next.tokens, 3);
    }

    #[test]
    fn test_wait_hint_is_one_refill_interval() {
        let (_, reply) = transition(bucket(0, 0), Ticks(0), 4, 4);
        assert!(!reply.allowed);
        assert_eq!(reply.wait_seconds(), 0.25);
    }

    #[test]
    fn test_earlier_reading_keeps_tokens() {
        let later = 1_700_000_000 * SECOND;
        let (next, reply) = transition(bucket(4, later), Ticks(later - 1), 5, 5);

        assert!(reply.allowed);
        assert_eq!(next, bucket(3, later));
    }

    #[test]
    fn test_out_of_order_readings_allow_exactly_capacity() {
        let t2 = 1_700_000_000 * SECOND;
        let mut state = MapState::at(t2);
        let keys = vec!["tokens".to_string(), "ticks".to_string()];
        let request = ThrottleRequest::new("k", 5, 5);
        let args = request.script_args().unwrap();

        let mut allowed = 0;
        for now in [t2, t2 - 1, t2, t2, t2, t2, t2, t2] {
            state.now = Ticks(now);
            let raw = apply(&mut state, &keys, &args).unwrap();
            if ScriptReply::parse(&raw).unwrap().allowed {
                allowed += 1;
            }
        }

        assert_eq!(allowed, 5);
        assert_eq!(state.get("ticks"), Some(t2.to_string()));
    }

    #[test]
    fn test_apply_starts_with_full_bucket() {
        let mut state = MapState::at(9 * SECOND);
        let keys = vec!["tokens".to_string(), "ticks".to_string()];
        let args = vec!["1".to_string(), "2".to_string()];

        for _ in 0..2 {
            let reply = ScriptReply::parse(&apply(&mut state, &keys, &args).unwrap()).unwrap();
            assert!(reply.allowed);
        }
        let reply = ScriptReply::parse(&apply(&mut state, &keys, &args).unwrap()).unwrap();
        assert!(!reply.allowed);

        assert_eq!(state.get("tokens"), Some("0".to_string()));
        assert_eq!(state.get("ticks"), Some((9 * SECOND).to_string()));
    }

    #[test]
    fn test_validate_fields() {
        let cases = [
            (ThrottleRequest::new("a b", 1, 1), "key"),
            (ThrottleRequest::new("k", -1, 1), "capacity"),
            (ThrottleRequest::new("k", 1, 0), "refill_rate"),
        ];
        for (request, expected) in cases {
            match request.validate() {
                Err(RateLimitError::InvalidArgument { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected InvalidArgument for {:?}, got {:?}", request, other),
            }
        }
        assert!(ThrottleRequest::new("k", 1, 1).validate().is_ok());
    }

    #[test]
    fn test_outcome() {
        let denied = ThrottleRequest::outcome(ScriptReply {
            allowed: false,
            wait_ticks: (SECOND / 2) as f64,
        });
        assert_eq!(denied.retry_after, 0.5);

        let allowed = ThrottleRequest::outcome(ScriptReply {
            allowed: true,
            wait_ticks: (SECOND / 2) as f64,
        });
        assert_eq!(allowed.retry_after, 0.0);
    }
}
