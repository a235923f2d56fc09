//! Thread-safe FIFO of compressed packets between the read loop and the decoder.
//!
//! The queue also owns the session's cooperative cancellation state:
//! - `playing`: cleared by any thread to stop the session
//! - `finished`: set by the read loop once the source is exhausted
//!
//! Both flags live under the same mutex as the packets, and every transition that could
//! leave a consumer parked (`finish`, `stop`) broadcasts on the condition variable.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::error::QueueError;
use crate::packet::CompressedPacket;

/// Outcome of [`PacketQueue::pop`].
#[derive(Debug, PartialEq, Eq)]
pub enum Pop {
    /// Ownership of the head packet passes to the caller.
    Packet(CompressedPacket),
    /// Non-blocking pop found the queue empty.
    WouldBlock,
    /// The session is no longer playing.
    Stopped,
    /// The source is exhausted and every packet was delivered. This call marked the
    /// session stopped; later calls report [`Pop::Stopped`].
    Drained,
}

/// Packet queue bounded by the producer via [`PacketQueue::size_bytes`].
///
/// ## Design
/// - **Single consumer transfer**: a popped packet is removed under the lock, so no two
///   `pop` calls can observe the same packet.
/// - Uses a single [`Condvar`] as a general "state changed" signal.
/// - `size` always equals the sum of the byte lengths of the queued packets.
pub struct PacketQueue {
    inner: Mutex<QueueInner>,
    cv: Condvar,
}

struct QueueInner {
    packets: VecDeque<CompressedPacket>,
    size: usize,
    playing: bool,
    finished: bool,
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketQueue {
    /// Create an empty, idle queue. Call [`PacketQueue::start`] before producing into it.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                packets: VecDeque::new(),
                size: 0,
                playing: false,
                finished: false,
            }),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reset the queue for a new session: drop leftovers, mark playing, clear end of stream.
    pub fn start(&self) {
        let mut g = self.lock();
        g.packets.clear();
        g.size = 0;
        g.playing = true;
        g.finished = false;
    }

    /// Append a clone of `packet` and wake one waiter.
    ///
    /// The caller keeps its own copy; only the reference-counted payload is shared.
    /// Never blocks on capacity. Fails only if the node cannot be allocated.
    pub fn push(&self, packet: &CompressedPacket) -> Result<(), QueueError> {
        let mut g = self.lock();
        g.packets
            .try_reserve(1)
            .map_err(|_| QueueError::OutOfMemory)?;
        g.size += packet.len();
        g.packets.push_back(packet.clone());
        drop(g);
        self.cv.notify_one();
        Ok(())
    }

    /// Take the head packet.
    ///
    /// With `blocking`, waits until a packet arrives or the session can no longer produce
    /// one. When the source is exhausted and the queue is drained, this marks the session
    /// stopped (clears `playing`), wakes everyone else and returns [`Pop::Drained`].
    pub fn pop(&self, blocking: bool) -> Pop {
        let mut g = self.lock();
        loop {
            if !g.playing {
                return Pop::Stopped;
            }

            if let Some(packet) = g.packets.pop_front() {
                g.size -= packet.len();
                return Pop::Packet(packet);
            }

            if !blocking {
                return Pop::WouldBlock;
            }

            if g.finished {
                g.playing = false;
                drop(g);
                self.cv.notify_all();
                return Pop::Drained;
            }

            g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Mark the source exhausted. Queued packets are still delivered before `pop` reports
    /// [`Pop::Stopped`].
    pub fn finish(&self) {
        let mut g = self.lock();
        g.finished = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Clear `playing` and wake all waiters. Returns whether the session was playing.
    ///
    /// Idempotent and safe to call from any thread.
    pub fn stop(&self) -> bool {
        let mut g = self.lock();
        let was_playing = g.playing;
        g.playing = false;
        drop(g);
        self.cv.notify_all();
        was_playing
    }

    /// Broadcast a state-changed wakeup without touching the flags.
    pub fn wake_all(&self) {
        self.cv.notify_all();
    }

    /// Block until `playing` is cleared, by [`PacketQueue::stop`] or by a drained `pop`.
    pub fn wait_until_stopped(&self) {
        let mut g = self.lock();
        while g.playing {
            g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn is_playing(&self) -> bool {
        self.lock().playing
    }

    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Cumulative byte length of the queued packets (best-effort snapshot).
    pub fn size_bytes(&self) -> usize {
        self.lock().size
    }

    /// Number of queued packets (best-effort snapshot).
    pub fn len(&self) -> usize {
        self.lock().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().packets.is_empty()
    }
}
