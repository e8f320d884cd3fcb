use std::io;
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

/// Spawn a named pipeline thread, pinned to `core` when one is given.
pub fn spawn_stage<F, T>(name: &str, core: Option<usize>, body: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let label = name.to_owned();
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || {
            if let Some(core) = core {
                pin_current_thread(&label, core);
            }
            body()
        })
}

fn pin_current_thread(name: &str, core: usize) {
    let Some(ids) = core_affinity::get_core_ids() else {
        warn!("{}: core ids unavailable, running unpinned", name);
        return;
    };
    match ids.into_iter().find(|id| id.id == core) {
        Some(id) if core_affinity::set_for_current(id) => {
            debug!("{} pinned to core {}", name, core)
        }
        Some(_) => warn!("{}: failed to pin to core {}", name, core),
        None => warn!("{}: no core {}, running unpinned", name, core),
    }
}

/// Seconds since the Unix epoch, zero if the clock is before it
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_thread_carries_its_name() {
        let handle = spawn_stage("lapse-test", None, || {
            thread::current().name().map(str::to_owned)
        })
        .unwrap();
        assert_eq!(handle.join().unwrap().as_deref(), Some("lapse-test"));
    }

    #[test]
    fn missing_core_does_not_prevent_spawn() {
        let handle = spawn_stage("lapse-pinned", Some(usize::MAX), || 7).unwrap();
        assert_eq!(handle.join().unwrap(), 7);
    }
}
