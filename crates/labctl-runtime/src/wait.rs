//! Pauses and readiness polling.
//!
//! Every wait in the driver goes through [`Pause`] so tests can run the whole
//! pipeline without sleeping.

use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

/// Interval between readiness probes.
pub const PROBE_INTERVAL: Duration = Duration::from_millis(500);

const CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

pub trait Pause {
    fn pause(&self, duration: Duration);
}

/// Blocks the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

/// Poll `probe` until it holds or `timeout` has been spent pausing.
///
/// Returns whether the condition was met. Timing out is not an error: the
/// caller carries on as if a fixed delay had elapsed.
pub fn wait_until(
    what: &str,
    timeout: Duration,
    interval: Duration,
    pause: &dyn Pause,
    mut probe: impl FnMut() -> bool,
) -> bool {
    let mut waited = Duration::ZERO;
    loop {
        if probe() {
            debug!(what, waited_ms = waited.as_millis() as u64, "Ready");
            return true;
        }
        if waited >= timeout {
            warn!(
                what,
                timeout_secs = timeout.as_secs(),
                "Not ready before timeout, continuing anyway"
            );
            return false;
        }
        let step = interval
            .max(Duration::from_millis(1))
            .min(timeout - waited);
        pause.pause(step);
        waited += step;
    }
}

/// True if something accepts TCP connections on localhost:`port`.
pub fn port_open(port: u16) -> bool {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).is_ok()
}
