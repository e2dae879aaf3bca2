//! Fixed window counter.
//!
//! Counts requests in a window that opens with the first request and lasts
//! `window_size` seconds. Once a request lands at or past the window end, the
//! count restarts at 1 and a new window opens at that request.

use super::key::{validate_key, AlgorithmKind};
use super::protocol::{counter_and_timestamp, int_arg, stored_int, ScriptReply};
use super::request::{ensure_positive, FixedWindowRequest, FixedWindowResult, LimitRequest};
use crate::clock::Ticks;
use crate::error::{RateLimitError, Result};
use crate::store::{AtomicScript, ScriptState};

// KEYS: count, window start. ARGV: window size (ticks), capacity.
// The clock is the server's TIME, read inside the script. Tick values exceed
// 2^53, so timestamps stay decimal strings and differences are taken on the
// seconds and sub-second parts separately.
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
local windowSize = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local count = 0
local startStr = nowStr
local allowed = 1

local countStr = redis.call('GET', KEYS[1])
if countStr then
    count = tonumber(countStr)
end

local storedStart = redis.call('GET', KEYS[2])
if storedStart then
    startStr = storedStart
end

local elapsed = ticksBetween(nowStr, startStr)
count = count + 1

if elapsed < windowSize then
    if count > capacity then
        allowed = 0
    end
else
    count = 1
    startStr = nowStr
    elapsed = 0
end

redis.call('SET', KEYS[1], count)
redis.call('SET', KEYS[2], startStr)

return allowed .. ',' .. math.abs(windowSize - elapsed)
"#;

static SCRIPT: AtomicScript = AtomicScript::new("fixed_window", LUA, apply);

/// Persisted state of one fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Requests seen in the current window, including denied ones
    pub count: i64,
    /// When the current window opened
    pub window_start: Ticks,
}

/// Apply one request to a window.
///
/// Returns the state to persist and the decision. The wait hint is the
/// distance to the window end; it is taken as an absolute value so a clock
/// that steps backwards never yields a negative wait.
pub fn transition(
    previous: WindowState,
    now: Ticks,
    window: Ticks,
    capacity: i64,
) -> (WindowState, ScriptReply) {
    let count = previous.count.saturating_add(1);
    let elapsed = now.get().saturating_sub(previous.window_start.get());

    if elapsed < window.get() {
        let wait = window.get().saturating_sub(elapsed).saturating_abs();
        let next = WindowState {
            count,
            window_start: previous.window_start,
        };
        let reply = ScriptReply {
            allowed: count <= capacity,
            wait_ticks: wait as f64,
        };
        (next, reply)
    } else {
        let next = WindowState {
            count: 1,
            window_start: now,
        };
        let reply = ScriptReply {
            allowed: true,
            wait_ticks: window.get() as f64,
        };
        (next, reply)
    }
}

fn apply(state: &mut dyn ScriptState, keys: &[String], args: &[String]) -> Result<String> {
    let (count_key, start_key) = counter_and_timestamp(keys)?;
    let now = state.now();
    let window = Ticks(int_arg(args, 0, "window size")?);
    let capacity = int_arg(args, 1, "capacity")?;

    let previous = WindowState {
        count: stored_int(state, count_key)?.unwrap_or(0),
        window_start: stored_int(state, start_key)?.map(Ticks).unwrap_or(now),
    };
    let (next, reply) = transition(previous, now, window, capacity);

    state.set(count_key, next.count.to_string());
    state.set(start_key, next.window_start.to_string());
    Ok(reply.encode())
}

impl FixedWindowRequest {
    fn window_ticks(&self) -> Result<Ticks> {
        Ticks::checked_from_secs(self.window_size)
            .ok_or_else(|| RateLimitError::invalid_argument("window_size", "is too large"))
    }
}

impl LimitRequest for FixedWindowRequest {
    type Outcome = FixedWindowResult;

    const KIND: AlgorithmKind = AlgorithmKind::FixedWindow;

    fn key(&self) -> &str {
        &self.key
    }

    fn validate(&self) -> Result<()> {
        validate_key(&self.key)?;
        ensure_positive("capacity", self.capacity)?;
        ensure_positive("window_size", self.window_size)?;
        self.window_ticks()?;
        Ok(())
    }

    fn script() -> &'static AtomicScript {
        &SCRIPT
    }

    fn script_args(&self) -> Result<Vec<String>> {
        Ok(vec![
            self.window_ticks()?.to_string(),
            self.capacity.to_string(),
        ])
    }

    fn outcome(reply: ScriptReply) -> FixedWindowResult {
        FixedWindowResult {
            allowed: reply.allowed,
            reset_after: if reply.allowed {
                0.0
            } else {
                reply.wait_seconds()
            },
        }
    }
}
