//! Sliding window of decoded pages around the visible range.
//!
//! The window owns the per-page slot table, a queue of decode jobs, and a
//! pool of worker threads that fill slots by loading cached images or
//! decoding pages. Scrolling moves the window: pages entering it are
//! scheduled, pages leaving it are evicted from memory.

mod cancel;
mod pool;
mod slots;
mod window;

pub use cancel::CancellationToken;
pub use pool::{DecodeJob, JobExecutor, JobQueue, WorkerPool, WorkerPoolConfig};
pub use slots::{PageSlot, PageSlotState, SlotTable};
pub use window::{PageWindow, WindowConfig};
