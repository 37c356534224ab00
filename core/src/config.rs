//! Compile-time tunables for the kernel primitive engine.

/// Lower numeric value means higher scheduling priority; 0 is highest.
pub const MAX_PRIORITY: u8 = 31;
pub const PRIORITY_LEVELS: usize = MAX_PRIORITY as usize + 1;

pub const MAX_PROCESSES: usize = 64;
pub const MAX_MUTEXES: usize = 64;
pub const MAX_EVENTS: usize = 64;
pub const MAX_SEMAPHORES: usize = 64;
pub const MAX_STREAMS: usize = 32;
pub const MAX_TIMERS: usize = 64;

/// Default bound on a process's IPC queue, absent an explicit capacity.
pub const DEFAULT_IPC_QUEUE_CAPACITY: usize = 16;

pub const SYSTEM_POOL_SIZE: usize = 64 * 1024;
pub const PAGED_POOL_SIZE: usize = 256 * 1024;
