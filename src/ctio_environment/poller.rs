// ctio_environment - Environment instruments for the CTIO observatory
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::cache::{Fetch, PolledCache};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Longest single sleep between checks of the stop signal and the cache interval.
pub const POLL_STEP: Duration = Duration::from_secs(1);
const MIN_POLL_STEP: Duration = Duration::from_millis(10);

/// Handle to a task refreshing a cache in the background.
///
/// The task calls `ensure_fresh()` on the cache, then sleeps for at most
/// `POLL_STEP` before checking again, so fetches are still spaced by the cache
/// interval. Dropping the handle ends the task the same way `stop()` does, but
/// without waiting for it.
#[derive(Debug)]
pub struct Poller {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Poller {
    pub fn spawn<F: Fetch>(cache: Arc<PolledCache<F>>) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let step = cache.interval().clamp(MIN_POLL_STEP, POLL_STEP);

        let handle = tokio::spawn(async move {
            tracing::info!(
                message = "polling started",
                instrument = %cache.name(),
                interval_secs = cache.interval().as_secs(),
            );

            loop {
                if *stopped.borrow() {
                    break;
                }

                cache.ensure_fresh().await;

                tokio::select! {
                    res = stopped.changed() => {
                        if res.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(step) => {}
                }
            }

            tracing::info!(message = "polling stopped", instrument = %cache.name());
        });

        Poller { stop, handle }
    }

    /// Signal the task to stop and wait for it to exit.
    ///
    /// A fetch already in flight is allowed to finish (bounded by the source's I/O
    /// timeouts), otherwise the task exits without sleeping again.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!(message = "polling task failed", error = %e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Poller, POLL_STEP};
    use crate::cache::PolledCache;
    use crate::testing::ScriptedFetch;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_polls_at_interval() {
        let fetch = ScriptedFetch::repeating(12.0);
        let calls = fetch.calls();
        let cache = Arc::new(PolledCache::new("test", fetch, Duration::from_secs(5)));
        let poller = Poller::spawn(Arc::clone(&cache));

        // Attempts at t=0, 5 and 10
        tokio::time::sleep(Duration::from_millis(12_500)).await;
        assert_eq!(3, calls.load(Ordering::SeqCst));
        assert_eq!(12.0, cache.peek().unwrap().temperature);

        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_within_one_step() {
        let fetch = ScriptedFetch::repeating(12.0);
        let calls = fetch.calls();
        let cache = Arc::new(PolledCache::new("test", fetch, Duration::from_secs(5)));
        let poller = Poller::spawn(Arc::clone(&cache));

        tokio::time::sleep(Duration::from_millis(7_500)).await;
        let before = calls.load(Ordering::SeqCst);

        let started = Instant::now();
        poller.stop().await;
        assert!(started.elapsed() <= POLL_STEP);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(before, calls.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_polling() {
        let fetch = ScriptedFetch::new([None, None, Some(3.5)]);
        let calls = fetch.calls();
        let cache = Arc::new(PolledCache::new("test", fetch, Duration::from_secs(2)));
        let poller = Poller::spawn(Arc::clone(&cache));

        tokio::time::sleep(Duration::from_millis(4_500)).await;
        assert_eq!(3, calls.load(Ordering::SeqCst));
        assert_eq!(3.5, cache.peek().unwrap().temperature);

        poller.stop().await;
    }
}
