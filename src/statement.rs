//! The Command data model (§3): one in-flight request/response round trip on a connection, with
//! its own timeout and cancellation state. A connection only ever drives one `Command` at a
//! time — enforced by `MssqlConnection::execute`-style methods requiring `&mut MssqlConnection`,
//! not by any runtime lock here (§5).

use std::time::Duration;

use crate::connection::{CommandTimeout, InterruptFlag};

/// A single statement execution in flight against a connection.
///
/// `interrupt_pending` and `response_reading` are flipped by the connection as it drives the
/// command's lifecycle; `interrupt()` is idempotent, matching the ATTENTION-signal protocol
/// where sending a second attention while one is already outstanding is a protocol violation
/// the connection must avoid by checking this flag first.
pub struct Command {
    query_timeout: Option<Duration>,
    cancel_query_timeout: Duration,
    interrupt_flag: InterruptFlag,
    /// `true` once the connection has started reading this command's response tokens; until
    /// then, an ATTENTION signal would race the request that hasn't been fully sent yet.
    response_reading: bool,
    timer: Option<CommandTimeout>,
}

impl Command {
    pub(crate) fn new(query_timeout: Option<Duration>, cancel_query_timeout: Duration) -> Self {
        Self {
            query_timeout,
            cancel_query_timeout,
            interrupt_flag: InterruptFlag::new(),
            response_reading: false,
            timer: None,
        }
    }

    pub(crate) fn begin_response_reading(&mut self) {
        self.response_reading = true;
    }

    pub(crate) fn is_response_reading(&self) -> bool {
        self.response_reading
    }

    /// Starts the query-timeout timer, if one is configured. Idempotent: calling this twice
    /// just restarts the timer with a fresh deadline, which is never something the connection
    /// director actually does (each command starts its timer exactly once) but is harmless.
    pub(crate) fn arm_timeout(&mut self, on_expire: impl FnOnce() + Send + 'static) {
        if let Some(timeout) = self.query_timeout {
            self.timer = Some(CommandTimeout::start(timeout, self.interrupt_flag.clone(), on_expire));
        }
    }

    /// Disarms the timer once the command has finished — cancelling a finished command's timer
    /// is not an error, it's the normal case.
    pub(crate) fn disarm_timeout(&mut self) {
        self.timer = None;
    }

    /// Idempotent: tripping an already-interrupted command is a no-op observed from the flag's
    /// own perspective, so callers don't need to track whether they've already interrupted.
    pub(crate) fn interrupt(&self, _reason: &str) {
        self.interrupt_flag.trip();
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        self.interrupt_flag.is_tripped()
    }

    pub(crate) fn cancel_query_timeout(&self) -> Duration {
        self.cancel_query_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_is_idempotent() {
        let command = Command::new(Some(Duration::from_secs(30)), Duration::from_secs(5));
        assert!(!command.is_interrupted());

        command.interrupt("first");
        command.interrupt("second");

        assert!(command.is_interrupted());
    }

    #[test]
    fn no_query_timeout_means_no_timer_is_armed() {
        let mut command = Command::new(None, Duration::from_secs(5));
        command.arm_timeout(|| panic!("should never fire without a query timeout"));
        assert!(command.timer.is_none());
    }
}
