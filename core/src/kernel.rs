//! Top-level wiring: owns every table the primitives need and
//! implements the operations the supervisor-call dispatcher switches
//! on. Playing the role of `kernel.c`'s `startup()` plus the bodies of
//! its `svc()` cases, minus the actual trap entry (that's `svc.rs`).

use alloc::vec::Vec;

use rexos_abi::ErrorCode;
use rexos_abi::ipc::{self as ipc_abi, Message};

use crate::config;
use crate::ipc;
use crate::irq::IrqTable;
use crate::pool::Pool;
use crate::process::{ProcessHandle, ProcessState, ProcessTable, SyncKind};
use crate::scheduler::Scheduler;
use crate::sync::event::{EventHandle, EventTable};
use crate::sync::mutex::{MutexHandle, MutexTable};
use crate::sync::sem::{SemaphoreHandle, SemaphoreTable};
use crate::sync::stream::{ReadOutcome, StreamHandle, StreamTable, WriteOutcome};
use crate::timer::{TimerHandle, TimerService};

/// Not a real HAL_* subsystem; tags timers armed by `sleep_ms` so
/// `advance_time` wakes the sleeper directly instead of posting an
/// `IPC_TIMEOUT`.
const SLEEP_TIMER_SUBSYSTEM: u8 = 0xFF;

/// Internal subsystem tags for suspension-point timeouts, reserved
/// outside the `HAL_*` range (0-5) those constants occupy. `advance_time`
/// uses these to find and remove the timed-out waiter from the right
/// object's waiter list before waking it with `ErrorCode::Timeout`.
const MUTEX_WAIT_SUBSYSTEM: u8 = 0xFE;
const EVENT_WAIT_SUBSYSTEM: u8 = 0xFD;
const SEM_WAIT_SUBSYSTEM: u8 = 0xFC;
const STREAM_WAIT_SUBSYSTEM: u8 = 0xFB;
const IPC_WAIT_SUBSYSTEM: u8 = 0xFA;

/// Result of an operation that can either complete immediately or park
/// the calling process as a waiter.
#[derive(Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    Granted,
    Blocked,
}

pub struct Kernel {
    pub processes: ProcessTable,
    pub scheduler: Scheduler,
    pub mutexes: MutexTable,
    pub events: EventTable,
    pub semaphores: SemaphoreTable,
    pub streams: StreamTable,
    pub timers: TimerService,
    pub irq: IrqTable,
    pub system_pool: Pool,
    pub paged_pool: Pool,
}

impl Kernel {
    pub fn new() -> Self {
        Kernel {
            processes: ProcessTable::new(),
            scheduler: Scheduler::new(),
            mutexes: MutexTable::new(),
            events: EventTable::new(),
            semaphores: SemaphoreTable::new(),
            streams: StreamTable::new(),
            timers: TimerService::new(),
            irq: IrqTable::new(),
            system_pool: Pool::new(config::SYSTEM_POOL_SIZE),
            paged_pool: Pool::new(config::PAGED_POOL_SIZE),
        }
    }

    /// Wakes `process` for a normal (non-timeout) reason: disarms and
    /// destroys any timeout timer the wait had armed, so it can't fire
    /// a stray `Timeout` after the process has already moved on.
    fn wake(&mut self, process: ProcessHandle) {
        let mut timer_to_destroy = None;
        if let Some(p) = self.processes.get_mut(process) {
            timer_to_destroy = p.wait_timer.take();
            p.wait_object = None;
            p.wait_reply_match = None;
            p.state = ProcessState::Active;
        }
        if let Some(timer) = timer_to_destroy {
            self.timers.destroy(timer);
        }
        if let Some(p) = self.processes.get(process) {
            let priority = p.effective_priority;
            self.scheduler.make_ready(process, priority);
        }
    }

    /// Wakes `process` because its suspension-point timer fired: the
    /// timer slot is already gone (the caller just popped it out of the
    /// timer service), so only the bookkeeping fields are cleared here.
    fn timeout_wake(&mut self, process: ProcessHandle) {
        if let Some(p) = self.processes.get_mut(process) {
            p.wait_timer = None;
            p.wait_object = None;
            p.wait_reply_match = None;
        }
        self.set_error(process, ErrorCode::Timeout);
        if let Some(p) = self.processes.get_mut(process) {
            p.state = ProcessState::Active;
        }
        if let Some(p) = self.processes.get(process) {
            let priority = p.effective_priority;
            self.scheduler.make_ready(process, priority);
        }
    }

    /// Arms a timeout timer for a process that just parked at a
    /// suspension point, unless `timeout_ms` is `None` (infinite wait).
    fn arm_wait_timeout(&mut self, process: ProcessHandle, timeout_ms: Option<u32>, subsystem: u8) {
        let Some(ms) = timeout_ms else { return };
        let timer = self.timers.create(process, subsystem);
        if self.timers.start_ms(timer, ms as u64).is_ok()
            && let Some(p) = self.processes.get_mut(process)
        {
            p.wait_timer = Some(timer);
        }
    }

    fn set_error(&mut self, process: ProcessHandle, error: ErrorCode) {
        if let Some(p) = self.processes.get_mut(process) {
            p.last_error = error;
        }
    }

    pub fn get_last_error(&self, process: ProcessHandle) -> ErrorCode {
        self.processes.get(process).map(|p| p.last_error).unwrap_or(ErrorCode::NotFound)
    }

    // -- Process -------------------------------------------------------

    pub fn process_create(&mut self, base_priority: u8) -> ProcessHandle {
        self.processes.create(base_priority, config::DEFAULT_IPC_QUEUE_CAPACITY)
    }

    pub fn process_unfreeze(&mut self, process: ProcessHandle) -> Result<(), ErrorCode> {
        let p = self.processes.get_mut(process).ok_or(ErrorCode::NotFound)?;
        if p.state != ProcessState::Frozen {
            return Err(ErrorCode::InvalidState);
        }
        p.state = ProcessState::Active;
        let priority = p.effective_priority;
        self.scheduler.make_ready(process, priority);
        Ok(())
    }

    pub fn process_destroy(&mut self, process: ProcessHandle) -> Result<(), ErrorCode> {
        if self.processes.get(process).is_none() {
            return Err(ErrorCode::NotFound);
        }
        self.scheduler.remove_ready_any(process);
        self.processes.destroy(process);
        Ok(())
    }

    pub fn process_set_priority(&mut self, process: ProcessHandle, priority: u8) -> Result<(), ErrorCode> {
        let p = self.processes.get_mut(process).ok_or(ErrorCode::NotFound)?;
        p.base_priority = priority;
        recompute_owner_priority(&mut self.processes, &self.mutexes, process);
        Ok(())
    }

    /// Newly created processes default to a stub that fails every
    /// write until `setup_stdout` runs, matching the original's
    /// boot-time default. There is no backing device to write to once
    /// configured (board bring-up is out of scope), so a configured
    /// write just reports its byte count as accepted.
    pub fn stdout_write(&mut self, process: ProcessHandle, len: usize) -> Result<usize, ErrorCode> {
        let p = self.processes.get(process).ok_or(ErrorCode::NotFound)?;
        if !p.stdout_configured {
            return Err(ErrorCode::StubCalled);
        }
        Ok(len)
    }

    /// Symmetric with `stdout_write`: fails with `StubCalled` until
    /// `setup_stdin` runs. There is no backing input source, so a
    /// configured read always reports zero bytes available.
    pub fn stdin_read(&mut self, process: ProcessHandle) -> Result<usize, ErrorCode> {
        let p = self.processes.get(process).ok_or(ErrorCode::NotFound)?;
        if !p.stdin_configured {
            return Err(ErrorCode::StubCalled);
        }
        Ok(0)
    }

    pub fn sleep_ms(&mut self, process: ProcessHandle, ms: u64) -> Result<(), ErrorCode> {
        let p = self.processes.get_mut(process).ok_or(ErrorCode::NotFound)?;
        p.state = ProcessState::WaitingTimerOnly;
        let timer = self.timers.create(process, SLEEP_TIMER_SUBSYSTEM);
        self.timers.start_ms(timer, ms)?;
        p.wake_time = Some(self.timers.get_uptime());
        Ok(())
    }

    /// Advances the simulated uptime, firing any expired timers. Sleep
    /// timers wake their owner directly with `ErrorCode::Ok`; a
    /// suspension-point timeout removes the waiter from its sync
    /// object before waking it with `ErrorCode::Timeout`; all other
    /// (HAL-owned) timers post `IPC_TIMEOUT` to their owning subsystem's
    /// process. Every fired timer's table slot is freed here, since
    /// `TimerService::advance` only reports the firing and leaves
    /// destruction to its caller.
    pub fn advance_time(&mut self, to_us: u64) {
        let fired = self.timers.advance(to_us);
        for (owner, subsystem, handle) in fired {
            self.timers.destroy(handle);
            match subsystem {
                SLEEP_TIMER_SUBSYSTEM => {
                    self.set_error(owner, ErrorCode::Ok);
                    self.wake(owner);
                }
                MUTEX_WAIT_SUBSYSTEM => {
                    if let Some(index) = self.processes.get(owner).and_then(|p| p.wait_object) {
                        let mutex = MutexHandle::new(index);
                        if let Some(m) = self.mutexes.get_mut(mutex) {
                            m.waiters.retain(|&w| w != owner);
                        }
                        if let Some(lock_owner) = self.mutexes.get(mutex).and_then(|m| m.owner) {
                            recompute_owner_priority(&mut self.processes, &self.mutexes, lock_owner);
                        }
                    }
                    self.timeout_wake(owner);
                }
                EVENT_WAIT_SUBSYSTEM => {
                    if let Some(index) = self.processes.get(owner).and_then(|p| p.wait_object) {
                        let event = EventHandle::new(index);
                        if let Some(e) = self.events.get_mut(event) {
                            e.waiters.retain(|&w| w != owner);
                        }
                    }
                    self.timeout_wake(owner);
                }
                SEM_WAIT_SUBSYSTEM => {
                    if let Some(index) = self.processes.get(owner).and_then(|p| p.wait_object) {
                        let sem = SemaphoreHandle::new(index);
                        if let Some(s) = self.semaphores.get_mut(sem) {
                            s.waiters.retain(|&w| w != owner);
                        }
                    }
                    self.timeout_wake(owner);
                }
                STREAM_WAIT_SUBSYSTEM => {
                    if let Some(index) = self.processes.get(owner).and_then(|p| p.wait_object) {
                        let stream = StreamHandle::new(index);
                        if let Some(s) = self.streams.get_mut(stream) {
                            s.cancel_read_wait(owner);
                            s.cancel_write_wait(owner);
                        }
                    }
                    self.timeout_wake(owner);
                }
                IPC_WAIT_SUBSYSTEM => {
                    self.timeout_wake(owner);
                }
                _ => {
                    let msg = Message::new(owner, ipc_abi::hal_cmd(subsystem, ipc_abi::IPC_TIMEOUT), owner);
                    let _ = ipc::post(&mut self.processes, msg);
                }
            }
        }
    }

    pub fn get_uptime(&self) -> (u64, u32) {
        self.timers.get_uptime()
    }

    // -- Timers ----------------------------------------------------------

    pub fn timer_create(&mut self, owner: ProcessHandle, subsystem: u8) -> TimerHandle {
        self.timers.create(owner, subsystem)
    }

    pub fn timer_start_ms(&mut self, timer: TimerHandle, ms: u64) -> Result<(), ErrorCode> {
        self.timers.start_ms(timer, ms)
    }

    pub fn timer_destroy(&mut self, timer: TimerHandle) -> Result<(), ErrorCode> {
        if self.timers.destroy(timer) { Ok(()) } else { Err(ErrorCode::NotFound) }
    }

    // -- Mutex -----------------------------------------------------------

    pub fn mutex_create(&mut self) -> MutexHandle {
        self.mutexes.create()
    }

    pub fn mutex_lock(
        &mut self,
        process: ProcessHandle,
        handle: MutexHandle,
        timeout_ms: Option<u32>,
    ) -> Result<WaitOutcome, ErrorCode> {
        let mutex = self.mutexes.get_mut(handle).ok_or(ErrorCode::NotFound)?;
        if mutex.owner.is_none() {
            mutex.owner = Some(process);
            if let Some(p) = self.processes.get_mut(process) {
                p.owned_mutexes.push(handle.index());
            }
            return Ok(WaitOutcome::Granted);
        }

        if timeout_ms == Some(0) {
            return Err(ErrorCode::Timeout);
        }

        let owner = mutex.owner.unwrap();
        mutex.waiters.push(process);
        if let Some(p) = self.processes.get_mut(process) {
            p.state = ProcessState::WaitingOnSync(SyncKind::Mutex);
            p.wait_object = Some(handle.index());
        }
        self.arm_wait_timeout(process, timeout_ms, MUTEX_WAIT_SUBSYSTEM);
        recompute_owner_priority(&mut self.processes, &self.mutexes, owner);
        Ok(WaitOutcome::Blocked)
    }

    pub fn mutex_unlock(
        &mut self,
        process: ProcessHandle,
        handle: MutexHandle,
    ) -> Result<Option<ProcessHandle>, ErrorCode> {
        {
            let mutex = self.mutexes.get(handle).ok_or(ErrorCode::NotFound)?;
            if mutex.owner != Some(process) {
                return Err(ErrorCode::AccessDenied);
            }
        }

        if let Some(p) = self.processes.get_mut(process) {
            p.owned_mutexes.retain(|&m| m != handle.index());
        }

        let new_owner = {
            let mutex = self.mutexes.get_mut(handle).unwrap();
            pick_best_waiter(&mut mutex.waiters, &self.processes)
        };

        {
            let mutex = self.mutexes.get_mut(handle).unwrap();
            mutex.owner = new_owner;
        }

        recompute_owner_priority(&mut self.processes, &self.mutexes, process);

        if let Some(new_owner) = new_owner {
            if let Some(p) = self.processes.get_mut(new_owner) {
                p.owned_mutexes.push(handle.index());
            }
            self.wake(new_owner);
            recompute_owner_priority(&mut self.processes, &self.mutexes, new_owner);
        }
        Ok(new_owner)
    }

    pub fn mutex_destroy(&mut self, handle: MutexHandle) -> Result<(), ErrorCode> {
        let waiters = self.mutexes.destroy(handle).ok_or(ErrorCode::NotFound)?;
        for waiter in waiters {
            self.set_error(waiter, ErrorCode::SyncObjectDestroyed);
            self.wake(waiter);
        }
        Ok(())
    }

    // -- Event -------------------------------------------------------------

    pub fn event_create(&mut self) -> EventHandle {
        self.events.create()
    }

    pub fn event_set(&mut self, handle: EventHandle) -> Result<(), ErrorCode> {
        let event = self.events.get_mut(handle).ok_or(ErrorCode::NotFound)?;
        event.set = true;
        let waiters = core::mem::take(&mut event.waiters);
        for waiter in waiters {
            self.wake(waiter);
        }
        Ok(())
    }

    pub fn event_pulse(&mut self, handle: EventHandle) -> Result<(), ErrorCode> {
        let event = self.events.get_mut(handle).ok_or(ErrorCode::NotFound)?;
        let waiters = core::mem::take(&mut event.waiters);
        for waiter in waiters {
            self.wake(waiter);
        }
        Ok(())
    }

    pub fn event_clear(&mut self, handle: EventHandle) -> Result<(), ErrorCode> {
        let event = self.events.get_mut(handle).ok_or(ErrorCode::NotFound)?;
        event.set = false;
        Ok(())
    }

    pub fn event_wait(
        &mut self,
        process: ProcessHandle,
        handle: EventHandle,
        timeout_ms: Option<u32>,
    ) -> Result<WaitOutcome, ErrorCode> {
        let event = self.events.get_mut(handle).ok_or(ErrorCode::NotFound)?;
        if event.set {
            return Ok(WaitOutcome::Granted);
        }
        if timeout_ms == Some(0) {
            return Err(ErrorCode::Timeout);
        }
        event.waiters.push(process);
        if let Some(p) = self.processes.get_mut(process) {
            p.state = ProcessState::WaitingOnSync(SyncKind::Event);
            p.wait_object = Some(handle.index());
        }
        self.arm_wait_timeout(process, timeout_ms, EVENT_WAIT_SUBSYSTEM);
        Ok(WaitOutcome::Blocked)
    }

    pub fn event_destroy(&mut self, handle: EventHandle) -> Result<(), ErrorCode> {
        let waiters = self.events.destroy(handle).ok_or(ErrorCode::NotFound)?;
        for waiter in waiters {
            self.set_error(waiter, ErrorCode::SyncObjectDestroyed);
            self.wake(waiter);
        }
        Ok(())
    }

    // -- Semaphore ----------------------------------------------------------

    pub fn sem_create(&mut self, initial: u32) -> SemaphoreHandle {
        self.semaphores.create(initial)
    }

    pub fn sem_signal(&mut self, handle: SemaphoreHandle) -> Result<(), ErrorCode> {
        let sem = self.semaphores.get_mut(handle).ok_or(ErrorCode::NotFound)?;
        if sem.waiters.is_empty() {
            sem.count += 1;
            Ok(())
        } else {
            let woken = sem.waiters.remove(0);
            self.wake(woken);
            Ok(())
        }
    }

    pub fn sem_wait(
        &mut self,
        process: ProcessHandle,
        handle: SemaphoreHandle,
        timeout_ms: Option<u32>,
    ) -> Result<WaitOutcome, ErrorCode> {
        let sem = self.semaphores.get_mut(handle).ok_or(ErrorCode::NotFound)?;
        if sem.count > 0 {
            sem.count -= 1;
            return Ok(WaitOutcome::Granted);
        }
        if timeout_ms == Some(0) {
            return Err(ErrorCode::Timeout);
        }
        sem.waiters.push(process);
        if let Some(p) = self.processes.get_mut(process) {
            p.state = ProcessState::WaitingOnSync(SyncKind::Sem);
            p.wait_object = Some(handle.index());
        }
        self.arm_wait_timeout(process, timeout_ms, SEM_WAIT_SUBSYSTEM);
        Ok(WaitOutcome::Blocked)
    }

    pub fn sem_destroy(&mut self, handle: SemaphoreHandle) -> Result<(), ErrorCode> {
        let waiters = self.semaphores.destroy(handle).ok_or(ErrorCode::NotFound)?;
        for waiter in waiters {
            self.set_error(waiter, ErrorCode::SyncObjectDestroyed);
            self.wake(waiter);
        }
        Ok(())
    }

    // -- Stream --------------------------------------------------------------

    pub fn stream_create(&mut self, size: usize) -> Result<StreamHandle, ErrorCode> {
        let offset = self.paged_pool.allocate(size).ok_or(ErrorCode::OutOfPagedMemory)?;
        Ok(self.streams.create(size, offset))
    }

    pub fn stream_start_listen(&mut self, process: ProcessHandle, handle: StreamHandle) -> Result<(), ErrorCode> {
        let stream = self.streams.get_mut(handle).ok_or(ErrorCode::NotFound)?;
        if !stream.start_listen(process) {
            return Err(ErrorCode::AccessDenied);
        }
        Ok(())
    }

    pub fn stream_stop_listen(&mut self, process: ProcessHandle, handle: StreamHandle) -> Result<(), ErrorCode> {
        let stream = self.streams.get_mut(handle).ok_or(ErrorCode::NotFound)?;
        stream.stop_listen(process);
        Ok(())
    }

    pub fn stream_get_size(&self, handle: StreamHandle) -> Result<usize, ErrorCode> {
        Ok(self.streams.get(handle).ok_or(ErrorCode::NotFound)?.get_size())
    }

    pub fn stream_get_free(&self, handle: StreamHandle) -> Result<usize, ErrorCode> {
        Ok(self.streams.get(handle).ok_or(ErrorCode::NotFound)?.get_free())
    }

    fn apply_stream_notify(&mut self, handle: StreamHandle, notify: &[usize]) {
        let listener = self.streams.get(handle).and_then(|s| s.listener);
        if let Some(listener) = listener {
            for &size in notify {
                let msg = Message::new(
                    listener,
                    ipc_abi::hal_cmd(ipc_abi::HAL_STREAM, ipc_abi::IPC_STREAM_WRITE),
                    listener,
                )
                .with_params(size as u32, 0, 0);
                let _ = ipc::post(&mut self.processes, msg);
            }
        }
    }

    pub fn stream_write(
        &mut self,
        process: ProcessHandle,
        handle: StreamHandle,
        data: &[u8],
        timeout_ms: Option<u32>,
    ) -> Result<WriteOutcome, ErrorCode> {
        let outcome = {
            let stream = self.streams.get_mut(handle).ok_or(ErrorCode::NotFound)?;
            if !stream.open {
                return Err(ErrorCode::NotActive);
            }
            stream.write(process, data)
        };
        self.apply_stream_notify(handle, &outcome.notify);
        for (reader, _) in &outcome.woken_readers {
            self.wake(*reader);
        }
        if outcome.blocked {
            if timeout_ms == Some(0) {
                if let Some(stream) = self.streams.get_mut(handle) {
                    stream.cancel_write_wait(process);
                }
                return Err(ErrorCode::Timeout);
            }
            if let Some(p) = self.processes.get_mut(process) {
                p.state = ProcessState::WaitingOnSync(SyncKind::Stream);
                p.wait_object = Some(handle.index());
            }
            self.arm_wait_timeout(process, timeout_ms, STREAM_WAIT_SUBSYSTEM);
        }
        Ok(outcome)
    }

    pub fn stream_read(
        &mut self,
        process: ProcessHandle,
        handle: StreamHandle,
        requested: usize,
        timeout_ms: Option<u32>,
    ) -> Result<ReadOutcome, ErrorCode> {
        let outcome = {
            let stream = self.streams.get_mut(handle).ok_or(ErrorCode::NotFound)?;
            if !stream.open {
                return Err(ErrorCode::NotActive);
            }
            stream.read(process, requested)
        };
        self.apply_stream_notify(handle, &outcome.notify);
        for &writer in &outcome.woken_writers {
            self.wake(writer);
        }
        if outcome.result.is_none() {
            if timeout_ms == Some(0) {
                if let Some(stream) = self.streams.get_mut(handle) {
                    stream.cancel_read_wait(process);
                }
                return Err(ErrorCode::Timeout);
            }
            if let Some(p) = self.processes.get_mut(process) {
                p.state = ProcessState::WaitingOnSync(SyncKind::Stream);
                p.wait_object = Some(handle.index());
            }
            self.arm_wait_timeout(process, timeout_ms, STREAM_WAIT_SUBSYSTEM);
        }
        Ok(outcome)
    }

    pub fn stream_flush(&mut self, handle: StreamHandle) -> Result<(), ErrorCode> {
        let (woken, notify) = {
            let stream = self.streams.get_mut(handle).ok_or(ErrorCode::NotFound)?;
            stream.flush()
        };
        self.apply_stream_notify(handle, &notify);
        for writer in woken {
            self.wake(writer);
        }
        Ok(())
    }

    // -- IPC -------------------------------------------------------------

    /// Posts `msg` to its destination, waking it if it's currently
    /// parked in `ipc_wait`/`post_wait` and the new message satisfies
    /// that wait.
    pub fn ipc_post(&mut self, msg: Message) -> Result<(), ErrorCode> {
        ipc::post(&mut self.processes, msg)?;
        self.wake_if_ipc_satisfied(msg.dest);
        Ok(())
    }

    pub fn ipc_post_inline(&mut self, msg: Message) -> Result<(), ErrorCode> {
        ipc::post_inline(&mut self.processes, msg)?;
        self.wake_if_ipc_satisfied(msg.dest);
        Ok(())
    }

    /// Blocks until any message is queued for `process`, per spec's
    /// `wait(timeout, wait_mode)`.
    pub fn ipc_wait(&mut self, process: ProcessHandle, timeout_ms: Option<u32>) -> Result<WaitOutcome, ErrorCode> {
        if ipc::peek(&self.processes, process).is_some() {
            return Ok(WaitOutcome::Granted);
        }
        if timeout_ms == Some(0) {
            return Err(ErrorCode::Timeout);
        }
        if let Some(p) = self.processes.get_mut(process) {
            p.state = ProcessState::WaitingOnSync(SyncKind::Ipc);
            p.wait_reply_match = None;
        }
        self.arm_wait_timeout(process, timeout_ms, IPC_WAIT_SUBSYSTEM);
        Ok(WaitOutcome::Blocked)
    }

    /// Sends `cmd`/`params` to `dest` and blocks until a reply matching
    /// `(cmd, dest)` is queued for `process`. Matching is by command
    /// field and source-process handle, per spec.
    pub fn ipc_post_wait(
        &mut self,
        process: ProcessHandle,
        dest: ProcessHandle,
        cmd: u32,
        params: (u32, u32, u32),
        timeout_ms: Option<u32>,
    ) -> Result<WaitOutcome, ErrorCode> {
        let msg = Message::new(dest, cmd, process).with_params(params.0, params.1, params.2);
        ipc::post(&mut self.processes, msg)?;

        if ipc::take_matching(&mut self.processes, process, cmd, dest).is_some() {
            return Ok(WaitOutcome::Granted);
        }
        if timeout_ms == Some(0) {
            return Err(ErrorCode::Timeout);
        }
        if let Some(p) = self.processes.get_mut(process) {
            p.state = ProcessState::WaitingOnSync(SyncKind::Ipc);
            p.wait_reply_match = Some((cmd, dest));
        }
        self.arm_wait_timeout(process, timeout_ms, IPC_WAIT_SUBSYSTEM);
        Ok(WaitOutcome::Blocked)
    }

    /// Checks whether `process`'s current IPC wait (plain or
    /// reply-matched) is now satisfied by its queue, and wakes it if so.
    fn wake_if_ipc_satisfied(&mut self, process: ProcessHandle) {
        let Some(p) = self.processes.get(process) else { return };
        if !matches!(p.state, ProcessState::WaitingOnSync(SyncKind::Ipc)) {
            return;
        }
        let satisfied = match p.wait_reply_match {
            Some((cmd, source)) => ipc::peek_matching(&self.processes, process, cmd, source),
            None => ipc::peek(&self.processes, process).is_some(),
        };
        if satisfied {
            self.wake(process);
        }
    }

    pub fn stream_destroy(&mut self, handle: StreamHandle) -> Result<(), ErrorCode> {
        let offset = self.streams.get(handle).ok_or(ErrorCode::NotFound)?.pool_offset();
        let (readers, writers) = self.streams.destroy(handle).ok_or(ErrorCode::NotFound)?;
        self.paged_pool.free(offset);
        for reader in readers {
            self.set_error(reader, ErrorCode::SyncObjectDestroyed);
            self.wake(reader);
        }
        for writer in writers {
            self.set_error(writer, ErrorCode::SyncObjectDestroyed);
            self.wake(writer);
        }
        Ok(())
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

/// Picks the waiter with the numerically-lowest (highest-effective)
/// priority, removing and returning it; ties go to whichever waiter was
/// enqueued first.
fn pick_best_waiter(waiters: &mut Vec<ProcessHandle>, processes: &ProcessTable) -> Option<ProcessHandle> {
    if waiters.is_empty() {
        return None;
    }
    let mut best = 0;
    for i in 1..waiters.len() {
        if processes.effective_priority(waiters[i]) < processes.effective_priority(waiters[best]) {
            best = i;
        }
    }
    Some(waiters.remove(best))
}

/// Recomputes `owner`'s effective priority as
/// `min(base_priority, min over owned mutexes of min waiter priority)`
/// — numerically, since 0 is the highest priority. Snapshots each owned
/// mutex's minimum waiter priority before calling into
/// `ProcessTable::recompute_effective_priority`, since that method holds
/// a mutable borrow of `processes` for the duration of the closure and
/// can't also lend it back out for a waiter-priority lookup.
fn recompute_owner_priority(processes: &mut ProcessTable, mutexes: &MutexTable, owner: ProcessHandle) {
    let owned_mutexes: Vec<u32> = processes.get(owner).map(|p| p.owned_mutexes.clone()).unwrap_or_default();
    let snapshot: Vec<(u32, Option<u8>)> = owned_mutexes
        .into_iter()
        .map(|mutex_index| {
            let handle = MutexHandle::new(mutex_index);
            let min_priority = mutexes
                .get(handle)
                .and_then(|m| m.waiters.iter().map(|&w| processes.effective_priority(w)).min());
            (mutex_index, min_priority)
        })
        .collect();

    processes.recompute_effective_priority(owner, |mutex_index| {
        snapshot.iter().find(|(idx, _)| *idx == mutex_index).and_then(|(_, p)| *p)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_inheritance_scenario() {
        let mut kernel = Kernel::new();
        let high = kernel.process_create(0);
        let mid = kernel.process_create(5);
        let low = kernel.process_create(10);
        let mutex = kernel.mutex_create();

        assert_eq!(kernel.mutex_lock(low, mutex, None).unwrap(), WaitOutcome::Granted);
        assert_eq!(kernel.mutex_lock(high, mutex, None).unwrap(), WaitOutcome::Blocked);
        assert_eq!(kernel.processes.get(low).unwrap().effective_priority, 0);

        // Mid was never a contender for the mutex; it stays at its own
        // priority and is never the highest-priority ready process
        // while low holds the boosted priority.
        assert_eq!(kernel.processes.get(mid).unwrap().effective_priority, 5);

        let new_owner = kernel.mutex_unlock(low, mutex).unwrap();
        assert_eq!(new_owner, Some(high));
        assert_eq!(kernel.processes.get(low).unwrap().effective_priority, 10);
        assert_eq!(kernel.processes.get(high).unwrap().state, ProcessState::Active);
    }

    #[test]
    fn unlock_by_non_owner_is_denied() {
        let mut kernel = Kernel::new();
        let a = kernel.process_create(5);
        let b = kernel.process_create(5);
        let mutex = kernel.mutex_create();
        kernel.mutex_lock(a, mutex, None).unwrap();
        assert_eq!(kernel.mutex_unlock(b, mutex).unwrap_err(), ErrorCode::AccessDenied);
    }

    #[test]
    fn timer_wake_scenario() {
        let mut kernel = Kernel::new();
        let sleeper = kernel.process_create(5);
        kernel.process_unfreeze(sleeper).unwrap();
        kernel.sleep_ms(sleeper, 5).unwrap();
        assert_eq!(kernel.processes.get(sleeper).unwrap().state, ProcessState::WaitingTimerOnly);
        kernel.advance_time(5_000);
        assert_eq!(kernel.processes.get(sleeper).unwrap().state, ProcessState::Active);
        assert_eq!(kernel.get_last_error(sleeper), ErrorCode::Ok);
    }

    #[test]
    fn destroying_a_mutex_wakes_waiters_with_sync_object_destroyed() {
        let mut kernel = Kernel::new();
        let owner = kernel.process_create(5);
        let waiter = kernel.process_create(5);
        let mutex = kernel.mutex_create();
        kernel.mutex_lock(owner, mutex, None).unwrap();
        kernel.mutex_lock(waiter, mutex, None).unwrap();
        kernel.mutex_destroy(mutex).unwrap();
        assert_eq!(kernel.get_last_error(waiter), ErrorCode::SyncObjectDestroyed);
    }

    #[test]
    fn mutex_lock_times_out_and_releases_the_lock_owners_inherited_priority() {
        let mut kernel = Kernel::new();
        let owner = kernel.process_create(10);
        let waiter = kernel.process_create(0);
        let mutex = kernel.mutex_create();
        kernel.mutex_lock(owner, mutex, None).unwrap();
        assert_eq!(kernel.mutex_lock(waiter, mutex, Some(5)).unwrap(), WaitOutcome::Blocked);
        assert_eq!(kernel.processes.get(owner).unwrap().effective_priority, 0);

        kernel.advance_time(5_000);

        assert_eq!(kernel.get_last_error(waiter), ErrorCode::Timeout);
        assert_eq!(kernel.processes.get(waiter).unwrap().state, ProcessState::Active);
        assert_eq!(kernel.processes.get(owner).unwrap().effective_priority, 10);
    }

    #[test]
    fn event_wait_times_out_and_is_removed_from_the_waiter_list() {
        let mut kernel = Kernel::new();
        let waiter = kernel.process_create(5);
        let event = kernel.event_create();
        assert_eq!(kernel.event_wait(waiter, event, Some(5)).unwrap(), WaitOutcome::Blocked);

        kernel.advance_time(5_000);

        assert_eq!(kernel.get_last_error(waiter), ErrorCode::Timeout);
        assert_eq!(kernel.processes.get(waiter).unwrap().state, ProcessState::Active);
        kernel.events.get_mut(event).unwrap().set = true;
        assert!(kernel.events.get(event).unwrap().waiters.is_empty());
    }

    #[test]
    fn sem_wait_times_out_and_is_removed_from_the_waiter_list() {
        let mut kernel = Kernel::new();
        let waiter = kernel.process_create(5);
        let sem = kernel.sem_create(0);
        assert_eq!(kernel.sem_wait(waiter, sem, Some(5)).unwrap(), WaitOutcome::Blocked);

        kernel.advance_time(5_000);

        assert_eq!(kernel.get_last_error(waiter), ErrorCode::Timeout);
        assert!(kernel.semaphores.get(sem).unwrap().waiters.is_empty());
    }

    #[test]
    fn stream_read_times_out_and_is_removed_from_the_waiter_list() {
        let mut kernel = Kernel::new();
        let reader = kernel.process_create(5);
        let stream = kernel.stream_create(4).unwrap();

        let outcome = kernel.stream_read(reader, stream, 8, Some(5)).unwrap();
        assert!(outcome.result.is_none());

        kernel.advance_time(5_000);

        assert_eq!(kernel.get_last_error(reader), ErrorCode::Timeout);
        assert_eq!(kernel.processes.get(reader).unwrap().state, ProcessState::Active);
        let (readers, _) = kernel.streams.destroy(stream).unwrap();
        assert!(readers.is_empty());
    }

    #[test]
    fn stream_write_zero_timeout_fails_without_parking() {
        let mut kernel = Kernel::new();
        let writer = kernel.process_create(5);
        let stream = kernel.stream_create(2).unwrap();

        let result = kernel.stream_write(writer, stream, b"abc", Some(0));
        assert!(matches!(result, Err(ErrorCode::Timeout)));
        let (_, writers) = kernel.streams.destroy(stream).unwrap();
        assert!(writers.is_empty());
    }

    #[test]
    fn destroying_a_stream_releases_its_paged_pool_allocation() {
        let mut kernel = Kernel::new();
        let before = kernel.paged_pool.free_bytes();
        let stream = kernel.stream_create(64).unwrap();
        assert_eq!(kernel.paged_pool.free_bytes(), before - 64);
        kernel.stream_destroy(stream).unwrap();
        assert_eq!(kernel.paged_pool.free_bytes(), before);
    }

    #[test]
    fn ipc_round_trip_through_stream_listener() {
        let mut kernel = Kernel::new();
        let listener = kernel.process_create(5);
        let writer = kernel.process_create(5);
        let stream = kernel.stream_create(16).unwrap();
        kernel.stream_start_listen(listener, stream).unwrap();
        kernel.stream_write(writer, stream, b"ABCDEFGHIJ", None).unwrap();
        let msg = ipc::try_receive(&mut kernel.processes, listener).unwrap();
        assert_eq!(msg.param1, 10);
    }
}
