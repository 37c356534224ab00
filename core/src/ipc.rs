//! Asynchronous IPC: bounded per-process message queues.
//!
//! `post`/`post_inline` are non-blocking and fail with `IpcOverflow` if
//! the destination's queue is full; `post_inline` exists only to mark
//! the interrupt-safe call sites — both share the same queue logic
//! here, since there's no separate interrupt-context path to guard
//! against in a single-core model without real IRQ preemption.

use rexos_abi::ErrorCode;
use rexos_abi::ipc::{Message, Process as ProcessTag};

use crate::process::ProcessTable;

pub type ProcessHandle = rexos_abi::handle::Handle<ProcessTag>;

/// Enqueues `msg` on its destination's queue. Silently succeeds as a
/// no-op if the destination no longer exists (process destruction drops
/// pending completions).
pub fn post(processes: &mut ProcessTable, msg: Message) -> Result<(), ErrorCode> {
    let Some(dest) = processes.get_mut(msg.dest) else { return Ok(()) };
    if dest.ipc_queue.len() >= dest.ipc_capacity {
        return Err(ErrorCode::IpcOverflow);
    }
    dest.ipc_queue.push_back(msg);
    Ok(())
}

/// Same queueing contract as `post`; kept distinct so callers from an
/// IRQ-context path read as such at the call site.
pub fn post_inline(processes: &mut ProcessTable, msg: Message) -> Result<(), ErrorCode> {
    post(processes, msg)
}

/// Non-blocking peek at the destination's queue head, without removing it.
pub fn peek(processes: &ProcessTable, process: ProcessHandle) -> Option<Message> {
    processes.get(process)?.ipc_queue.front().copied()
}

/// Non-blocking pop of the destination's queue head.
pub fn try_receive(processes: &mut ProcessTable, process: ProcessHandle) -> Option<Message> {
    processes.get_mut(process)?.ipc_queue.pop_front()
}

/// Pops the first queued message matching `(cmd, source)`, for
/// `post_wait`'s reply correlation — matching is by command field and
/// source-process handle, not FIFO order.
pub fn take_matching(processes: &mut ProcessTable, process: ProcessHandle, cmd: u32, source: ProcessHandle) -> Option<Message> {
    let queue = &mut processes.get_mut(process)?.ipc_queue;
    let position = queue.iter().position(|m| m.cmd == cmd && m.source == source)?;
    queue.remove(position)
}

/// Non-destructive check for whether a matching reply is already queued.
pub fn peek_matching(processes: &ProcessTable, process: ProcessHandle, cmd: u32, source: ProcessHandle) -> bool {
    processes
        .get(process)
        .map(|p| p.ipc_queue.iter().any(|m| m.cmd == cmd && m.source == source))
        .unwrap_or(false)
}

/// Posts a reply carrying a result code, dropped silently if the
/// destination has been destroyed. `io` is the caller-owned buffer
/// reference, encoded by convention into `param2`.
pub fn complete(
    processes: &mut ProcessTable,
    dest: ProcessHandle,
    cmd: u32,
    result_code: ErrorCode,
    io: u32,
) {
    let msg = Message::new(dest, cmd, ProcessHandle::invalid())
        .with_params(result_code as u32, io, 0);
    let _ = post(processes, msg);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rexos_abi::ipc::hal_cmd;

    #[test]
    fn post_is_fifo_per_destination() {
        let mut processes = ProcessTable::new();
        let dest = processes.create(5, 2);
        let source = ProcessHandle::invalid();
        post(&mut processes, Message::new(dest, hal_cmd(0, 1), source)).unwrap();
        post(&mut processes, Message::new(dest, hal_cmd(0, 2), source)).unwrap();
        assert_eq!(try_receive(&mut processes, dest).unwrap().cmd, hal_cmd(0, 1));
        assert_eq!(try_receive(&mut processes, dest).unwrap().cmd, hal_cmd(0, 2));
    }

    #[test]
    fn post_overflows_when_queue_is_full() {
        let mut processes = ProcessTable::new();
        let dest = processes.create(5, 1);
        let source = ProcessHandle::invalid();
        post(&mut processes, Message::new(dest, hal_cmd(0, 1), source)).unwrap();
        let err = post(&mut processes, Message::new(dest, hal_cmd(0, 2), source)).unwrap_err();
        assert_eq!(err, ErrorCode::IpcOverflow);
    }

    #[test]
    fn completion_to_a_destroyed_process_is_dropped_silently() {
        let mut processes = ProcessTable::new();
        let dest = processes.create(5, 2);
        processes.destroy(dest);
        complete(&mut processes, dest, hal_cmd(0, 1), ErrorCode::Ok, 0);
    }
}
