//! Connection resiliency (§4.4/§9): when a connection breaks mid-query, reopen it up to
//! `connect_retry_count` times, waiting `connect_retry_interval` between attempts, all bounded
//! by `login_timeout` for any single attempt. If the wait itself would already exceed how long
//! the caller is willing to wait for the query to finish, retrying is pointless — fail with a
//! timeout immediately instead of stalling past the deadline the caller actually asked for.

use std::time::Duration;

use tokio::time::sleep;

use crate::connection::MssqlConnection;
use crate::error::Error;
use crate::options::MssqlConnectOptions;

/// Opens a connection, retrying according to `options.connect_retry_count`/
/// `connect_retry_interval`. A `connect_retry_count` of `0` disables resiliency entirely — a
/// single failed attempt is returned as-is.
pub(crate) async fn connect_with_retry(options: &MssqlConnectOptions) -> Result<MssqlConnection, Error> {
    if options.connect_retry_count == 0 {
        return MssqlConnection::establish(options).await;
    }

    if let Some(query_timeout) = options.query_timeout {
        if options.connect_retry_interval > query_timeout {
            return Err(Error::Timeout(query_timeout));
        }
    }

    let mut last_error = None;

    for attempt in 0..options.connect_retry_count {
        if attempt > 0 {
            log::debug!(
                "connection attempt {attempt} failed, waiting {:?} before retrying",
                options.connect_retry_interval
            );
            sleep(options.connect_retry_interval).await;
        }

        match MssqlConnection::establish(options).await {
            Ok(conn) => return Ok(conn),
            Err(e) => last_error = Some(e),
        }
    }

    Err(last_error.expect("loop runs at least once"))
}

impl MssqlConnection {
    /// Recovers from a connection that broke mid-query (§4.4/§9 scenario S4): re-establishes a
    /// fresh connection with the same options (itself retried per `connect_with_retry`), then
    /// restores the session to whichever database was active when the old one died, if the
    /// server granted session recovery. The caller is expected to resubmit whatever statement
    /// was in flight against the replaced connection.
    pub(crate) async fn reconnect_mid_query(&mut self) -> Result<(), Error> {
        let restore_database = self.stream.current_database.clone();

        let mut fresh = connect_with_retry(&self.options).await?;

        if fresh.session_recovery_enabled {
            if let Some(database) = restore_database.filter(|db| *db != fresh.options.database) {
                fresh.switch_database(&database).await?;
            }
        }

        *self = fresh;
        Ok(())
    }
}

/// The worst-case time a caller should expect `connect_with_retry` to take: `count` total
/// connection attempts, with a wait between each consecutive pair, so `count - 1` waits and
/// `count` login attempts (§9's retry-envelope formula).
pub(crate) fn expected_timeout(options: &MssqlConnectOptions) -> Duration {
    let count = u32::from(options.connect_retry_count);
    if count == 0 {
        return options.login_timeout;
    }
    options.connect_retry_interval * (count - 1) + options.login_timeout * count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_timeout_matches_the_retry_envelope_formula() {
        let options = MssqlConnectOptions::new()
            .login_timeout(Duration::from_secs(5))
            .connect_retry_interval(Duration::from_secs(10))
            .unwrap()
            .connect_retry_count(3)
            .unwrap();

        // interval * (count - 1 gaps between count attempts) + login * (count attempts)
        let expected = Duration::from_secs(10) * 2 + Duration::from_secs(5) * 3;
        assert_eq!(expected_timeout(&options), expected);
    }

    #[test]
    fn expected_timeout_matches_the_spec_worked_example() {
        let options = MssqlConnectOptions::new()
            .login_timeout(Duration::from_secs(5))
            .connect_retry_interval(Duration::from_secs(10))
            .unwrap()
            .connect_retry_count(2)
            .unwrap();

        let expected = Duration::from_secs(20);
        assert_eq!(expected_timeout(&options), expected);
    }

    #[test]
    fn zero_retries_yields_just_the_login_timeout() {
        let options = MssqlConnectOptions::new().connect_retry_count(0).unwrap();
        assert_eq!(expected_timeout(&options), options.login_timeout);
    }
}
