//! Serial transport shared by the protocol layers.
//!
//! Outbound writes from any number of tasks are serialized by a TX lock with
//! bounded wait. Inbound data arrives from interrupt context through a fixed
//! capacity FIFO that never blocks the producer.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embassy_time::{with_timeout, Duration};
use heapless::Vec;
use portable_atomic::{AtomicBool, AtomicU32, Ordering};

use crate::hal::{HalError, SerialSink};

/// Serial transport errors. All are recoverable status values.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// Transport is closed
    NotOpen,
    /// TX lock not acquired within the caller's timeout
    AcquisitionTimeout,
    /// Payload does not fit the frame buffer
    FrameTooLarge,
    /// Underlying sink failed
    Io(HalError),
}

#[cfg(feature = "std")]
impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TransportError::NotOpen => write!(f, "Transport not open"),
            TransportError::AcquisitionTimeout => write!(f, "Timed out waiting for TX lock"),
            TransportError::FrameTooLarge => write!(f, "Frame too large"),
            TransportError::Io(err) => write!(f, "Serial I/O failed: {}", err),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TransportError {}

/// Owned outbound frame. Handing it to [`SerialTransport::write_frame`]
/// transfers ownership to the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerialFrame<const L: usize> {
    frame_type: u8,
    data: Vec<u8, L>,
}

impl<const L: usize> SerialFrame<L> {
    pub const fn new(frame_type: u8) -> Self {
        Self {
            frame_type,
            data: Vec::new(),
        }
    }

    pub fn from_slice(frame_type: u8, data: &[u8]) -> Result<Self, TransportError> {
        let data = Vec::from_slice(data).map_err(|_| TransportError::FrameTooLarge)?;
        Ok(Self { frame_type, data })
    }

    pub fn push(&mut self, byte: u8) -> Result<(), TransportError> {
        self.data.push(byte).map_err(|_| TransportError::FrameTooLarge)
    }

    pub fn frame_type(&self) -> u8 {
        self.frame_type
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Mutex-guarded, interrupt-fed serial transport.
///
/// `S` is the byte sink, `T` the inbound item type and `N` the inbound queue
/// capacity, fixed for the life of the transport.
pub struct SerialTransport<M: RawMutex, S, T, const N: usize> {
    open: AtomicBool,
    tx: Mutex<M, S>,
    rx: Channel<M, T, N>,
    overflows: AtomicU32,
}

impl<M: RawMutex, S: SerialSink, T, const N: usize> SerialTransport<M, S, T, N> {
    /// Create a closed transport; usable in a `static`
    pub const fn new(sink: S) -> Self {
        Self {
            open: AtomicBool::new(false),
            tx: Mutex::new(sink),
            rx: Channel::new(),
            overflows: AtomicU32::new(0),
        }
    }

    /// Open the transport. Opening an open transport is a no-op.
    pub fn open(&self) {
        if self.open.swap(true, Ordering::AcqRel) {
            return;
        }
        self.overflows.store(0, Ordering::Relaxed);

        #[cfg(feature = "defmt")]
        defmt::info!("Serial transport open (rx capacity {})", N);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Close the transport and discard queued input. Later writes fail with
    /// [`TransportError::NotOpen`].
    pub fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        while self.rx.try_receive().is_ok() {}

        #[cfg(feature = "defmt")]
        defmt::info!("Serial transport closed");
    }

    /// Acquire the TX lock, waiting at most `timeout` (`None` waits forever).
    ///
    /// The lock is held until the returned guard is dropped, so several
    /// payloads can be sent back to back without interleaving.
    pub async fn acquire(&self, timeout: Option<Duration>) -> Result<TxGuard<'_, M, S>, TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }

        let guard = match timeout {
            None => self.tx.lock().await,
            Some(limit) if limit.as_ticks() == 0 => {
                self.tx.try_lock().map_err(|_| TransportError::AcquisitionTimeout)?
            }
            Some(limit) => with_timeout(limit, self.tx.lock())
                .await
                .map_err(|_| TransportError::AcquisitionTimeout)?,
        };

        // Closed while we were waiting
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }

        Ok(TxGuard {
            sink: guard,
            open: &self.open,
        })
    }

    /// Write an untyped payload
    pub async fn write(&self, data: &[u8], timeout: Option<Duration>) -> Result<(), TransportError> {
        self.send(None, data, timeout).await
    }

    /// Write a payload tagged with a frame type
    pub async fn write_typed(
        &self,
        frame_type: u8,
        data: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), TransportError> {
        self.send(Some(frame_type), data, timeout).await
    }

    /// Write and consume an owned frame
    pub async fn write_frame<const L: usize>(
        &self,
        frame: SerialFrame<L>,
        timeout: Option<Duration>,
    ) -> Result<(), TransportError> {
        self.send(Some(frame.frame_type()), frame.as_slice(), timeout).await
    }

    async fn send(&self, frame_type: Option<u8>, data: &[u8], timeout: Option<Duration>) -> Result<(), TransportError> {
        let mut guard = self.acquire(timeout).await.map_err(|err| {
            #[cfg(feature = "defmt")]
            if err == TransportError::AcquisitionTimeout {
                defmt::debug!("TX lock timeout, dropping {} bytes", data.len());
            }
            err
        })?;
        guard.send(frame_type, data).await
    }

    /// Inbound queue handle for the consumer task
    pub fn queue(&self) -> RxQueue<'_, M, T, N> {
        RxQueue { channel: &self.rx }
    }

    /// Producer handle for interrupt context
    pub fn producer(&self) -> RxProducer<'_, M, T, N> {
        RxProducer {
            channel: &self.rx,
            open: &self.open,
            overflows: &self.overflows,
        }
    }

    /// Enqueue from interrupt context; see [`RxProducer::push`]
    pub fn enqueue_from_isr(&self, item: T) -> bool {
        self.producer().push(item)
    }

    /// Items dropped on a full queue since the transport was opened
    pub fn overflow_count(&self) -> u32 {
        self.overflows.load(Ordering::Relaxed)
    }
}

/// Exclusive access to the sink. Dropping it releases the TX lock on every
/// exit path. Sends fail once the transport is closed.
pub struct TxGuard<'a, M: RawMutex, S> {
    sink: MutexGuard<'a, M, S>,
    open: &'a AtomicBool,
}

impl<'a, M: RawMutex, S: SerialSink> TxGuard<'a, M, S> {
    pub async fn send(&mut self, frame_type: Option<u8>, data: &[u8]) -> Result<(), TransportError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TransportError::NotOpen);
        }
        self.sink.write(frame_type, data).await.map_err(TransportError::Io)
    }

    pub fn sink(&mut self) -> &mut S {
        &mut self.sink
    }
}

/// Consumer side of the inbound FIFO
pub struct RxQueue<'a, M: RawMutex, T, const N: usize> {
    channel: &'a Channel<M, T, N>,
}

impl<'a, M: RawMutex, T, const N: usize> RxQueue<'a, M, T, N> {
    /// Wait for the next item, at most `timeout` (`None` waits forever)
    pub async fn receive(&self, timeout: Option<Duration>) -> Option<T> {
        match timeout {
            None => Some(self.channel.receive().await),
            Some(limit) => with_timeout(limit, self.channel.receive()).await.ok(),
        }
    }

    pub fn try_receive(&self) -> Option<T> {
        self.channel.try_receive().ok()
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

/// Interrupt-side producer. Never blocks: a full queue or closed transport
/// drops the item.
pub struct RxProducer<'a, M: RawMutex, T, const N: usize> {
    channel: &'a Channel<M, T, N>,
    open: &'a AtomicBool,
    overflows: &'a AtomicU32,
}

impl<'a, M: RawMutex, T, const N: usize> RxProducer<'a, M, T, N> {
    /// Returns false if the item was dropped
    pub fn push(&self, item: T) -> bool {
        if !self.open.load(Ordering::Acquire) {
            return false;
        }
        match self.channel.try_send(item) {
            Ok(()) => true,
            Err(_) => {
                let dropped = self.overflows.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
                #[cfg(feature = "defmt")]
                if dropped % 64 == 1 {
                    defmt::warn!("RX queue full, dropped {} items", dropped);
                }
                #[cfg(not(feature = "defmt"))]
                let _ = dropped;
                false
            }
        }
    }
}

impl<'a, M: RawMutex, T, const N: usize> Clone for RxProducer<'a, M, T, N> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, M: RawMutex, T, const N: usize> Copy for RxProducer<'a, M, T, N> {}
