//! Dedicated acquisition thread
//!
//! The task is the only code that talks to the [`FrameSource`] after setup.
//! It waits for either an acquisition request or a buffer coming back on the
//! return queue. A request is served only while the ready queue has room
//! and fewer than `pool_size` buffers are outstanding. The task therefore
//! never runs more than the ready queue's capacity ahead of the consumer,
//! and never sits inside a blocking `acquire` while every buffer is held
//! downstream waiting to be returned.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{Receiver, Selector, Sender};
use tracing::{debug, info, warn};

use crate::capture::{FrameBuffer, FrameSource};
use crate::pipeline::stats::PipelineStats;

/// Channel ends owned by the acquisition task.
pub(crate) struct TaskChannels {
    pub requests: Receiver<()>,
    pub ready: Sender<FrameBuffer>,
    pub returns: Receiver<FrameBuffer>,
}

/// How often a deferred request re-checks a full ready queue.
const READY_RECHECK: Duration = Duration::from_millis(2);

enum Event {
    Request,
    Recheck,
    RequestsClosed,
    Returned(FrameBuffer),
    ReturnsClosed,
}

pub(crate) struct AcquisitionTask {
    source: Box<dyn FrameSource>,
    channels: TaskChannels,
    pool_size: usize,
    outstanding: usize,
    pending: bool,
    requests_open: bool,
    stats: Arc<PipelineStats>,
}

impl AcquisitionTask {
    pub fn new(
        source: Box<dyn FrameSource>,
        channels: TaskChannels,
        pool_size: usize,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            source,
            channels,
            pool_size,
            outstanding: 0,
            pending: false,
            requests_open: true,
            stats,
        }
    }

    /// Start the task on its own thread.
    ///
    /// The task only moves onto the thread once the thread exists, so a
    /// failed spawn hands the task (and its source) back to the caller.
    pub fn spawn(self, core: Option<usize>) -> Result<JoinHandle<()>, (io::Error, Self)> {
        let (handoff_tx, handoff_rx) = flume::bounded::<Self>(1);
        let spawned = thread::Builder::new()
            .name("framebuffer_task".into())
            .spawn(move || {
                let Ok(task) = handoff_rx.recv() else {
                    return;
                };
                if let Some(core) = core {
                    pin_to_core(core);
                }
                task.run();
            });

        match spawned {
            Ok(handle) => match handoff_tx.send(self) {
                Ok(()) => Ok(handle),
                Err(flume::SendError(task)) => Err((
                    io::Error::other("acquisition thread exited before start"),
                    task,
                )),
            },
            Err(e) => Err((e, self)),
        }
    }

    /// Give back the frame source of a task that never ran.
    pub fn into_source(self) -> Box<dyn FrameSource> {
        self.source
    }

    fn can_acquire(&self) -> bool {
        self.outstanding < self.pool_size && !self.channels.ready.is_full()
    }

    fn run(mut self) {
        info!(pool_size = self.pool_size, "Acquisition task started");

        loop {
            self.drain_returns();

            if self.pending && self.can_acquire() {
                self.pending = false;
                self.acquire_and_forward();
                continue;
            }

            if !self.requests_open && self.outstanding == 0 {
                break;
            }

            match self.wait() {
                Event::Request => self.pending = true,
                Event::Recheck => {}
                Event::RequestsClosed => {
                    debug!("Request channel closed, no further acquisitions");
                    self.requests_open = false;
                    self.pending = false;
                }
                Event::Returned(buffer) => self.release(buffer),
                Event::ReturnsClosed => break,
            }
        }

        if self.outstanding > 0 {
            warn!(
                outstanding = self.outstanding,
                "Acquisition task stopped with buffers still outside the pool"
            );
        } else {
            info!("Acquisition task stopped");
        }
    }

    fn wait(&self) -> Event {
        let on_return = |r: Result<FrameBuffer, _>| match r {
            Ok(buffer) => Event::Returned(buffer),
            Err(_) => Event::ReturnsClosed,
        };

        if !self.requests_open {
            return on_return(self.channels.returns.recv());
        }

        let selector = Selector::new()
            .recv(&self.channels.requests, |r| match r {
                Ok(()) => Event::Request,
                Err(_) => Event::RequestsClosed,
            })
            .recv(&self.channels.returns, on_return);

        // Draining the ready queue sends no wakeup, so a request deferred
        // on a full queue looks again after a short sleep
        if self.pending && self.channels.ready.is_full() {
            selector.wait_timeout(READY_RECHECK).unwrap_or(Event::Recheck)
        } else {
            selector.wait()
        }
    }

    fn acquire_and_forward(&mut self) {
        let buffer = match self.source.acquire() {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!("Frame acquisition failed, skipping: {}", e);
                self.stats.record_acquire_failure();
                return;
            }
        };

        self.outstanding += 1;
        self.stats.record_acquired();
        debug!(
            slot = buffer.slot,
            sequence = buffer.sequence,
            len = buffer.data.len(),
            "Frame acquired"
        );

        // Only this task pushes, and the queue had room before `acquire`
        if let Err(flume::SendError(buffer)) = self.channels.ready.send(buffer) {
            debug!("Ready queue closed, returning frame to pool");
            self.release(buffer);
            self.requests_open = false;
            self.pending = false;
        }
    }

    fn drain_returns(&mut self) {
        while let Ok(buffer) = self.channels.returns.try_recv() {
            self.release(buffer);
        }
    }

    fn release(&mut self, buffer: FrameBuffer) {
        debug!(slot = buffer.slot, sequence = buffer.sequence, "Frame released");
        self.source.release(buffer);
        self.outstanding = self.outstanding.saturating_sub(1);
        self.stats.record_released();
    }
}

fn pin_to_core(core: usize) {
    let Some(ids) = core_affinity::get_core_ids() else {
        warn!(core, "Could not enumerate CPU cores, task left unpinned");
        return;
    };
    match ids.into_iter().find(|id| id.id == core) {
        Some(id) if core_affinity::set_for_current(id) => {
            info!(core, "Acquisition task pinned");
        }
        _ => warn!(core, "Could not pin acquisition task"),
    }
}
