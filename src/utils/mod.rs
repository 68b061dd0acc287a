// ============================================================================
// Utilities Module
// Worker placement and logging setup
// ============================================================================

mod affinity;
#[cfg(feature = "logging")]
mod logging;

pub use affinity::{assign_worker_cores, available_cores, pin_current_thread_to_core};
#[cfg(feature = "logging")]
pub use logging::init_logging;
