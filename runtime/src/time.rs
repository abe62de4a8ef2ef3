use std::time::{SystemTime, UNIX_EPOCH};

/// Current UNIX time in milliseconds, truncated to 32 bits as the protocol's `now_ms` ticks are.
///
/// Wraps every ~49.7 days; see [`diff`] for the comparison semantics this is meant to feed.
pub fn unix_time_ms() -> u32 {
	let dur = SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock should be after the UNIX epoch");

	dur.as_millis() as u32
}

/// Signed difference between two wrapping millisecond timestamps: `(i32)(a - b)`.
///
/// Matches the source's comparison idiom for timer expiry checks (`diff(now, deadline) >= 0`)
/// without assuming `now` and `deadline` never wrap relative to each other.
#[inline]
pub fn diff(a: u32, b: u32) -> i32 {
	a.wrapping_sub(b) as i32
}
