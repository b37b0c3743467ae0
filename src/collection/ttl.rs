//! TTL daemon.
//!
//! When configured with a positive age and interval, a periodic task runs on
//! the global scheduler and evicts every document whose last touch is older
//! than the age. Each tick executes as a normal sequence of remove
//! mutations, so listeners see ordinary `delete` events and transactional
//! collections keep their guarantees.

use crate::collection::Collection;
use crate::common::{schedule_cancellable_task, ScheduledHandle};
use crate::errors::{ErrorKind, OpalError, OpalResult};
use std::sync::Arc;
use std::time::Duration;

/// Current TTL configuration plus the cancellation handle of the scheduled
/// task.
#[derive(Default)]
pub(crate) struct TtlState {
    pub(crate) age_ms: i64,
    pub(crate) interval_ms: i64,
    pub(crate) handle: Option<ScheduledHandle>,
}

impl TtlState {
    pub(crate) fn cancel(&mut self) {
        // dropping the handle cancels the scheduled task
        self.handle = None;
        self.age_ms = 0;
        self.interval_ms = 0;
    }
}

impl Collection {
    /// Reconfigures TTL eviction: documents whose `meta.updated` (falling
    /// back to `meta.created`) is older than `age_ms` are removed on a
    /// periodic check every `interval_ms`. A negative age (or non-positive
    /// interval) cancels the daemon.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidConfiguration` when metadata is disabled: without
    /// timestamps there is nothing to age out.
    pub fn set_ttl(&self, age_ms: i64, interval_ms: i64) -> OpalResult<()> {
        if age_ms >= 0 && self.inner.config.disable_meta {
            log::error!("TTL requires document metadata");
            return Err(OpalError::new(
                "TTL requires document metadata",
                ErrorKind::InvalidConfiguration,
            ));
        }

        let mut ttl = self.inner.ttl.lock();
        if age_ms < 0 || interval_ms <= 0 {
            ttl.cancel();
            return Ok(());
        }

        ttl.age_ms = age_ms;
        ttl.interval_ms = interval_ms;

        let weak = Arc::downgrade(&self.inner);
        ttl.handle = schedule_cancellable_task(Duration::from_millis(interval_ms as u64), move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove_expired(age_ms);
            }
        });
        Ok(())
    }

    /// Configured TTL age in milliseconds, 0 when disabled.
    pub fn ttl_age(&self) -> i64 {
        self.inner.ttl.lock().age_ms
    }

    /// Configured TTL check interval in milliseconds, 0 when disabled.
    pub fn ttl_interval(&self) -> i64 {
        self.inner.ttl.lock().interval_ms
    }
}
