//! # Measurement thread isolation
//!
//! Timing is only comparable across probes when the walk stays on one core and is not preempted
//! by ordinary work. Both steps are best effort: failures are logged and measurement continues.
use log::{info, warn};

/// What could be applied to the current thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Isolation {
    pub pinned_core: Option<usize>,
    pub max_priority: bool,
}

/// Pin the calling thread to `cpu_core` (if given) and raise it to maximum priority
pub fn isolate_current_thread(cpu_core: Option<usize>) -> Isolation {
    let mut isolation = Isolation::default();

    if let Some(cpu_num) = cpu_core {
        let core_num = core_affinity::CoreId { id: cpu_num };
        if core_affinity::set_for_current(core_num) {
            isolation.pinned_core = Some(cpu_num);
        } else {
            warn!("Couldn't pin measurement thread to CPU core {cpu_num} (NOTE: this is expected on macOS)");
        }
    }

    if thread_priority::set_current_thread_priority(thread_priority::ThreadPriority::Max).is_err() {
        warn!("Couldn't set measurement thread to maximum thread priority");
    } else {
        isolation.max_priority = true;
    }

    info!("measurement thread isolation: {isolation:?}");
    isolation
}

/// First core reported by the OS, used when no core is requested explicitly
pub fn default_core() -> Option<usize> {
    core_affinity::get_core_ids()
        .and_then(|ids| ids.first().copied())
        .map(|core| core.id)
}
