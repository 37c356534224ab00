//! Byte-stream pipe: a single-producer/multi-consumer (or symmetric)
//! ring buffer with blocking reader/writer hand-off and an optional
//! listener.
//!
//! Grounded on `kernel/kstream.c`: a writer first drains directly into
//! any pending readers (reader-first fast path), spills the residue
//! into the ring, and only blocks as a writer if neither absorbed
//! everything; a reader is symmetric (ring first, then direct drain
//! from pending writers) and calls the writer-drain step again at the
//! end so newly-freed ring space can pull in anything still parked on
//! `write_waiters`. `IPC_STREAM_WRITE{total_requested_size}` is posted
//! to the listener, once per writer, only when that writer's bytes
//! actually passed through the ring (matching the original's
//! `ipc_post_inline` call sites in `kstream_write`/`kstream_push`, not
//! the direct reader hand-off path).

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use rexos_abi::handle::Handle;
use rexos_lib::ByteRing;

use crate::process::ProcessHandle;

pub struct StreamTag;
pub type StreamHandle = Handle<StreamTag>;

struct ReadWaiter {
    process: ProcessHandle,
    remaining: usize,
    collected: Vec<u8>,
}

struct WriteWaiter {
    process: ProcessHandle,
    data: Vec<u8>,
    offset: usize,
    total_size: usize,
    ring_touched: bool,
}

pub struct Stream {
    ring: ByteRing,
    read_waiters: VecDeque<ReadWaiter>,
    write_waiters: VecDeque<WriteWaiter>,
    pub listener: Option<ProcessHandle>,
    pub open: bool,
    pool_offset: usize,
}

#[derive(Default)]
pub struct WriteOutcome {
    pub blocked: bool,
    pub woken_readers: Vec<(ProcessHandle, Vec<u8>)>,
    pub notify: Vec<usize>,
}

#[derive(Default)]
pub struct ReadOutcome {
    pub result: Option<Vec<u8>>,
    pub woken_writers: Vec<ProcessHandle>,
    pub notify: Vec<usize>,
}

impl Stream {
    fn new(ring_capacity: usize, pool_offset: usize) -> Self {
        Stream {
            ring: ByteRing::new(ring_capacity),
            read_waiters: VecDeque::new(),
            write_waiters: VecDeque::new(),
            listener: None,
            open: true,
            pool_offset,
        }
    }

    pub fn pool_offset(&self) -> usize {
        self.pool_offset
    }

    /// Removes `process` from the read-waiter list without delivering a
    /// result, for a caller that asked for a non-blocking or timed-out wait.
    pub fn cancel_read_wait(&mut self, process: ProcessHandle) -> bool {
        let before = self.read_waiters.len();
        self.read_waiters.retain(|w| w.process != process);
        self.read_waiters.len() != before
    }

    /// Removes `process` from the write-waiter list, as `cancel_read_wait`
    /// does for readers. Any bytes already drained into the ring stay there.
    pub fn cancel_write_wait(&mut self, process: ProcessHandle) -> bool {
        let before = self.write_waiters.len();
        self.write_waiters.retain(|w| w.process != process);
        self.write_waiters.len() != before
    }

    pub fn get_size(&self) -> usize {
        self.ring.capacity()
    }

    pub fn get_free(&self) -> usize {
        self.ring.free()
    }

    /// Drains parked writers into the ring as space allows. Returns the
    /// writers that became fully satisfied this way, in FIFO order,
    /// alongside whether a notification is owed for each.
    fn push_writers(&mut self) -> (Vec<ProcessHandle>, Vec<usize>) {
        let mut woken = Vec::new();
        let mut notify = Vec::new();
        while self.ring.free() > 0 {
            let Some(front) = self.write_waiters.front_mut() else { break };
            let remaining = &front.data[front.offset..];
            let written = self.ring.write(remaining);
            if written > 0 {
                front.offset += written;
                front.ring_touched = true;
            }
            if front.offset >= front.data.len() {
                let done = self.write_waiters.pop_front().unwrap();
                woken.push(done.process);
                if self.listener.is_some() && done.ring_touched {
                    notify.push(done.total_size);
                }
            } else {
                break;
            }
        }
        (woken, notify)
    }

    pub fn write(&mut self, process: ProcessHandle, data: &[u8]) -> WriteOutcome {
        let total_size = data.len();
        let mut outcome = WriteOutcome::default();
        let mut cursor = 0usize;

        while cursor < data.len() {
            let Some(front) = self.read_waiters.front_mut() else { break };
            let take = (data.len() - cursor).min(front.remaining);
            front.collected.extend_from_slice(&data[cursor..cursor + take]);
            front.remaining -= take;
            cursor += take;
            if front.remaining == 0 {
                let done = self.read_waiters.pop_front().unwrap();
                outcome.woken_readers.push((done.process, done.collected));
            }
        }

        let residue = &data[cursor..];
        let ring_received = self.ring.write(residue);
        cursor += ring_received;
        let ring_touched = ring_received > 0;

        if cursor == data.len() {
            if ring_touched && self.listener.is_some() {
                outcome.notify.push(total_size);
            }
            outcome.blocked = false;
        } else {
            self.write_waiters.push_back(WriteWaiter {
                process,
                data: data[cursor..].to_vec(),
                offset: 0,
                total_size,
                ring_touched,
            });
            outcome.blocked = true;
        }
        outcome
    }

    pub fn read(&mut self, process: ProcessHandle, requested: usize) -> ReadOutcome {
        let mut outcome = ReadOutcome::default();
        let mut collected = alloc::vec![0u8; 0];
        collected.reserve(requested);

        let mut buf = alloc::vec![0u8; requested];
        let from_ring = self.ring.read(&mut buf);
        collected.extend_from_slice(&buf[..from_ring]);

        let mut remaining = requested - from_ring;
        while remaining > 0 {
            let Some(front) = self.write_waiters.front_mut() else { break };
            let take = remaining.min(front.data.len() - front.offset);
            collected.extend_from_slice(&front.data[front.offset..front.offset + take]);
            front.offset += take;
            remaining -= take;
            if front.offset >= front.data.len() {
                let done = self.write_waiters.pop_front().unwrap();
                outcome.woken_writers.push(done.process);
                if done.ring_touched && self.listener.is_some() {
                    outcome.notify.push(done.total_size);
                }
            }
        }

        if remaining == 0 {
            outcome.result = Some(collected);
        } else {
            self.read_waiters.push_back(ReadWaiter { process, remaining, collected });
        }

        let (more_woken, more_notify) = self.push_writers();
        outcome.woken_writers.extend(more_woken);
        outcome.notify.extend(more_notify);
        outcome
    }

    /// Clears the ring and wakes all writers (not readers), giving
    /// parked writers a chance to drain into the now-empty ring.
    pub fn flush(&mut self) -> (Vec<ProcessHandle>, Vec<usize>) {
        self.ring.clear();
        self.push_writers()
    }

    pub fn start_listen(&mut self, process: ProcessHandle) -> bool {
        if self.listener.is_some() {
            return false;
        }
        self.listener = Some(process);
        true
    }

    /// Matches the original's `stop_listen`, which (re)assigns the
    /// listener field to the calling process rather than clearing it.
    pub fn stop_listen(&mut self, process: ProcessHandle) {
        self.listener = Some(process);
    }

    /// Wakes every waiter with `SyncObjectDestroyed`, returning
    /// (readers, writers) so the caller can deliver that error and
    /// release the ring to the paged pool.
    pub fn destroy(mut self) -> (Vec<ProcessHandle>, Vec<ProcessHandle>) {
        let readers = self.read_waiters.drain(..).map(|w| w.process).collect();
        let writers = self.write_waiters.drain(..).map(|w| w.process).collect();
        (readers, writers)
    }
}

#[derive(Default)]
pub struct StreamTable {
    slots: Vec<Option<Stream>>,
    free_list: Vec<u32>,
}

impl StreamTable {
    pub fn new() -> Self {
        StreamTable { slots: Vec::new(), free_list: Vec::new() }
    }

    pub fn create(&mut self, ring_capacity: usize, pool_offset: usize) -> StreamHandle {
        let index = if let Some(index) = self.free_list.pop() {
            index
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(None);
            index
        };
        self.slots[index as usize] = Some(Stream::new(ring_capacity, pool_offset));
        StreamHandle::new(index)
    }

    pub fn destroy(&mut self, handle: StreamHandle) -> Option<(Vec<ProcessHandle>, Vec<ProcessHandle>)> {
        let index = handle.index() as usize;
        let slot = self.slots.get_mut(index)?.take()?;
        self.free_list.push(handle.index());
        Some(slot.destroy())
    }

    pub fn get(&self, handle: StreamHandle) -> Option<&Stream> {
        self.slots.get(handle.index() as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, handle: StreamHandle) -> Option<&mut Stream> {
        self.slots.get_mut(handle.index() as usize)?.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_hand_off_scenario() {
        let mut stream = Stream::new(16, 0);
        let reader = ProcessHandle::new(1);
        let writer = ProcessHandle::new(2);

        let read_outcome = stream.read(reader, 8);
        assert!(read_outcome.result.is_none());

        let write_outcome = stream.write(writer, b"ABCDEFGHIJ");
        assert!(!write_outcome.blocked);
        assert_eq!(write_outcome.woken_readers.len(), 1);
        assert_eq!(write_outcome.woken_readers[0].0, reader);
        assert_eq!(write_outcome.woken_readers[0].1, b"ABCDEFGH");
        assert_eq!(stream.get_free(), 14);
    }

    #[test]
    fn listener_receives_notify_only_when_ring_is_touched() {
        let mut stream = Stream::new(16, 0);
        let listener = ProcessHandle::new(9);
        assert!(stream.start_listen(listener));
        let reader = ProcessHandle::new(1);
        let writer = ProcessHandle::new(2);
        stream.read(reader, 8);
        let outcome = stream.write(writer, b"ABCDEFGHIJ");
        assert_eq!(outcome.notify, alloc::vec![10]);
    }

    #[test]
    fn no_notify_when_writer_fully_drained_by_reader_alone() {
        let mut stream = Stream::new(16, 0);
        let listener = ProcessHandle::new(9);
        stream.start_listen(listener);
        let reader = ProcessHandle::new(1);
        let writer = ProcessHandle::new(2);
        stream.read(reader, 20);
        let outcome = stream.write(writer, b"ABCDE");
        assert!(outcome.notify.is_empty());
    }

    #[test]
    fn writer_blocks_when_ring_and_readers_are_exhausted() {
        let mut stream = Stream::new(4, 0);
        let writer = ProcessHandle::new(2);
        let outcome = stream.write(writer, b"ABCDEFGH");
        assert!(outcome.blocked);
        assert_eq!(stream.get_free(), 0);
    }

    #[test]
    fn destroy_wakes_a_pending_reader() {
        let mut stream = Stream::new(2, 0);
        let reader = ProcessHandle::new(1);
        stream.read(reader, 8);
        stream.write(ProcessHandle::new(3), b"AB");
        let (readers, writers) = stream.destroy();
        assert_eq!(readers, alloc::vec![reader]);
        assert!(writers.is_empty());
    }

    #[test]
    fn destroy_wakes_a_blocked_writer() {
        let mut stream = Stream::new(2, 0);
        let writer = ProcessHandle::new(2);
        let outcome = stream.write(writer, b"ABCDEF");
        assert!(outcome.blocked);
        let (readers, writers) = stream.destroy();
        assert!(readers.is_empty());
        assert_eq!(writers, alloc::vec![writer]);
    }
}
