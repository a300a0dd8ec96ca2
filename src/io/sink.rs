//! Sink Driver: consumes buffers from a bounded queue (the back-pressure
//! mechanism — a full queue blocks the producer) and writes them to a
//! configured writer. On shutdown it flushes any partial buffer and emits a
//! final EOS marker downstream of itself.

use crate::buffer::TupleBuffer;
use crate::error::Result;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where a sink's bytes ultimately land: a file, a network channel, stdout,
/// or (in tests) an in-memory capture.
pub trait SinkWriter: Send {
    fn write(&mut self, bytes: &[u8]) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
    /// Called exactly once, after the last `write`, when the input side has
    /// signaled end of stream.
    fn eos(&mut self) -> Result<()>;
}

/// The producer-facing handle: submitting blocks once `queue_depth` buffers
/// are outstanding, which is the back-pressure contract. Cloning shares the
/// same queue across multiple producer threads; the queue closes (and
/// `SinkDriver::run` drains and exits) once every clone is dropped.
#[derive(Clone)]
pub struct SinkHandle {
    sender: Sender<TupleBuffer>,
}

impl SinkHandle {
    pub fn submit(&self, buffer: TupleBuffer) -> Result<()> {
        self.sender
            .send(buffer)
            .map_err(|_| crate::error::CoreError::ChannelUnrecoverable("sink queue disconnected".into()))
    }

    /// Explicitly drops this handle, closing the queue once no other clone
    /// remains outstanding.
    pub fn close(self) {
        drop(self.sender);
    }
}

pub struct SinkDriver {
    receiver: Receiver<TupleBuffer>,
}

impl SinkDriver {
    /// Returns the driver (run on the egress thread) paired with the handle
    /// producers submit through. Keeping the two separate means closing
    /// every handle can disconnect the queue without also destroying the
    /// still-running driver.
    pub fn new(queue_depth: usize) -> (Self, SinkHandle) {
        let (sender, receiver) = bounded(queue_depth.max(1));
        (Self { receiver }, SinkHandle { sender })
    }

    /// Runs the egress loop on the calling thread until every `SinkHandle`
    /// has been dropped, then flushes and emits EOS.
    pub fn run(&self, mut writer: impl SinkWriter, poll_interval: Duration) -> Result<()> {
        info!("sink driver started");
        loop {
            match self.receiver.recv_timeout(poll_interval) {
                Ok(buffer) => buffer.with_bytes(|bytes| writer.write(bytes))?,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("sink driver flushing on shutdown");
        writer.flush()?;
        writer.eos()?;
        Ok(())
    }
}
