//! Background prefetching of rendered frames.

mod bulk;
mod scheduler;
mod window;

pub use bulk::{spiral_order, BulkSummary};
pub use scheduler::PrefetchManager;
pub use window::{compute_window, WindowSlot};
