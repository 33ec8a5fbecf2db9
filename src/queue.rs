//! Task serialization for the control channel.
//!
//! FTP forbids overlapping command-response round trips on one control
//! connection. The queue wraps the channel in a FIFO-fair async mutex:
//! leasing the channel *is* submitting a task, and a second operation
//! issued before the first resolves waits instead of erroring.
//!
//! Fatal channel errors (timeout, disconnect, protocol failure) mark the
//! channel dead; releasing a lease over a dead channel drops it, so every
//! queued and future submission fails with `Closed`.

use crate::connection::ControlChannel;
use crate::error::{FtpError, FtpResult};
use crate::types::FtpResponse;
use tokio::sync::{Mutex, MutexGuard};

pub(crate) struct TaskQueue {
    channel: Mutex<Option<ControlChannel>>,
}

impl TaskQueue {
    pub fn new(channel: ControlChannel) -> Self {
        Self {
            channel: Mutex::new(Some(channel)),
        }
    }

    /// Wait for exclusive use of the control channel. Returns `Closed` if
    /// the client was closed or the channel died under a previous task.
    pub async fn lease(&self) -> FtpResult<ChannelLease<'_>> {
        let guard = self.channel.lock().await;
        if guard.is_none() {
            return Err(FtpError::closed());
        }
        Ok(ChannelLease { guard })
    }

    /// One command-response round trip as a single queued task.
    pub async fn round_trip(&self, command: &str) -> FtpResult<FtpResponse> {
        let mut lease = self.lease().await?;
        lease.channel().execute(command).await
    }

    /// Like `round_trip` but requires a 2xx reply.
    pub async fn round_trip_ok(&self, command: &str) -> FtpResult<FtpResponse> {
        let mut lease = self.lease().await?;
        lease.channel().expect_ok(command).await
    }

    /// Take the channel out, closing the queue. Pending and future leases
    /// fail with `Closed`.
    pub async fn close(&self) -> Option<ControlChannel> {
        self.channel.lock().await.take()
    }
}

/// Exclusive access to the control channel for the duration of one task.
pub(crate) struct ChannelLease<'a> {
    guard: MutexGuard<'a, Option<ControlChannel>>,
}

impl ChannelLease<'_> {
    pub fn channel(&mut self) -> &mut ControlChannel {
        self.guard.as_mut().expect("leased channel present")
    }
}

impl Drop for ChannelLease<'_> {
    fn drop(&mut self) {
        // A task that killed the channel must not hand it to the next one.
        if self.guard.as_ref().map(|c| c.is_dead()).unwrap_or(false) {
            *self.guard = None;
        }
    }
}
