//! Bounded polling.  Every wait in boss-manage (stack lifecycle, change sets, secret store and
//! identity provider health) goes through `poll`.

use log::info;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Calls `check` every `interval` until it returns `Ok(Some(_))`, returns an error, or `timeout`
/// has passed.  Returns `Ok(None)` on timeout so the caller can attach its own context, e.g.
/// `poll(..).await?.context(TimeoutSnafu { .. })`.
///
/// Dropping the returned future between checks cancels the wait.
pub(crate) async fn poll<T, E, F, Fut>(
    what: &str,
    interval: Duration,
    timeout: Option<Duration>,
    mut check: F,
) -> std::result::Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<Option<T>, E>>,
{
    let start = Instant::now();
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        if let Some(ready) = check().await? {
            return Ok(Some(ready));
        }
        if let Some(timeout) = timeout {
            if start.elapsed() + interval > timeout {
                return Ok(None);
            }
        }
        info!(
            "Waiting for {}... (attempt {}, {}s elapsed)",
            what,
            attempts,
            start.elapsed().as_secs()
        );
        sleep(interval).await;
    }
}
