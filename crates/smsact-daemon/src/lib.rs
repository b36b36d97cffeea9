//! smsact-daemon library: shared state, webhook handlers, and the glue
//! that drives the poll worker. The binary in `main.rs` wires these
//! together; everything here is testable without a socket.

pub mod handlers;
pub mod state;

/// Wall-clock unix seconds. The core takes `now` explicitly; this is the
/// single place the daemon reads the clock.
#[must_use]
pub fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}
