//! Station link driver port

use crate::errors::LinkError;
use crate::link::LinkEvents;

/// Radio (or OS network manager) in station mode
///
/// Association is asynchronous: [`associate`](LinkDriver::associate) only
/// starts it. Progress is reported later through the [`LinkEvents`] handle
/// given to [`register`](LinkDriver::register), possibly from another thread
/// or an interrupt-driven callback. A driver may instead report completion
/// from inside `associate`, as long as the call returns within a fixed bound.
pub trait LinkDriver: Send {
    /// Receive the handle used to report link-up, address and link-down events
    fn register(&mut self, events: LinkEvents);

    /// Start associating with the given network
    ///
    /// Must not wait for completion unboundedly. A short reachability check
    /// with its own timeout is allowed.
    fn associate(&mut self, ssid: &str, secret: &str) -> Result<(), LinkError>;

    /// Tear the association down
    fn disconnect(&mut self);
}
