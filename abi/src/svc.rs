//! Supervisor-call command numbers.
//!
//! `svc(num, p1, p2, p3)` switches on one flat `num`, grouped here by the
//! primitive cluster it belongs to (process, mutex, event, sem, irq,
//! timer, ipc, stream, stdio setup), matching the switch in the original
//! `kernel.c`. Unknown numbers yield `ErrorCode::InvalidSvc`.

pub type SvcNumber = u32;

// Process
pub const SVC_PROCESS_CREATE: SvcNumber = 0x0100;
pub const SVC_PROCESS_DESTROY: SvcNumber = 0x0101;
pub const SVC_PROCESS_UNFREEZE: SvcNumber = 0x0102;
pub const SVC_PROCESS_SLEEP: SvcNumber = 0x0103;
pub const SVC_PROCESS_SET_PRIORITY: SvcNumber = 0x0104;
pub const SVC_PROCESS_GET_LAST_ERROR: SvcNumber = 0x0105;

// Mutex
pub const SVC_MUTEX_CREATE: SvcNumber = 0x0200;
pub const SVC_MUTEX_LOCK: SvcNumber = 0x0201;
pub const SVC_MUTEX_UNLOCK: SvcNumber = 0x0202;
pub const SVC_MUTEX_DESTROY: SvcNumber = 0x0203;

// Event
pub const SVC_EVENT_CREATE: SvcNumber = 0x0300;
pub const SVC_EVENT_SET: SvcNumber = 0x0301;
pub const SVC_EVENT_PULSE: SvcNumber = 0x0302;
pub const SVC_EVENT_CLEAR: SvcNumber = 0x0303;
pub const SVC_EVENT_WAIT: SvcNumber = 0x0304;
pub const SVC_EVENT_DESTROY: SvcNumber = 0x0305;

// Semaphore
pub const SVC_SEM_CREATE: SvcNumber = 0x0400;
pub const SVC_SEM_SIGNAL: SvcNumber = 0x0401;
pub const SVC_SEM_WAIT: SvcNumber = 0x0402;
pub const SVC_SEM_DESTROY: SvcNumber = 0x0403;

// IRQ
pub const SVC_IRQ_REGISTER: SvcNumber = 0x0500;
pub const SVC_IRQ_UNREGISTER: SvcNumber = 0x0501;

// Timer
pub const SVC_TIMER_CREATE: SvcNumber = 0x0600;
pub const SVC_TIMER_START_MS: SvcNumber = 0x0601;
pub const SVC_TIMER_DESTROY: SvcNumber = 0x0602;
pub const SVC_TIMER_GET_UPTIME: SvcNumber = 0x0603;

// IPC
pub const SVC_IPC_POST: SvcNumber = 0x0700;
pub const SVC_IPC_POST_INLINE: SvcNumber = 0x0701;
pub const SVC_IPC_PEEK: SvcNumber = 0x0702;
pub const SVC_IPC_WAIT: SvcNumber = 0x0703;
pub const SVC_IPC_POST_WAIT: SvcNumber = 0x0704;

// Stream
pub const SVC_STREAM_CREATE: SvcNumber = 0x0800;
pub const SVC_STREAM_OPEN: SvcNumber = 0x0801;
pub const SVC_STREAM_CLOSE: SvcNumber = 0x0802;
pub const SVC_STREAM_WRITE: SvcNumber = 0x0803;
pub const SVC_STREAM_READ: SvcNumber = 0x0804;
pub const SVC_STREAM_FLUSH: SvcNumber = 0x0805;
pub const SVC_STREAM_START_LISTEN: SvcNumber = 0x0806;
pub const SVC_STREAM_STOP_LISTEN: SvcNumber = 0x0807;
pub const SVC_STREAM_GET_SIZE: SvcNumber = 0x0808;
pub const SVC_STREAM_GET_FREE: SvcNumber = 0x0809;
pub const SVC_STREAM_DESTROY: SvcNumber = 0x080A;

// Stdio setup, one-time latch on SETUP_DBG
pub const SVC_SETUP_STDOUT: SvcNumber = 0x0900;
pub const SVC_SETUP_STDIN: SvcNumber = 0x0901;
pub const SVC_SETUP_DBG: SvcNumber = 0x0902;
pub const SVC_STDIO_WRITE: SvcNumber = 0x0903;
pub const SVC_STDIO_READ: SvcNumber = 0x0904;
