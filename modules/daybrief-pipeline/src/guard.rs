use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use daybrief_common::DaybriefError;

/// Single-flight guard for pipeline runs. Acquiring while a run is active
/// fails immediately with [`DaybriefError::RunInFlight`]; callers are
/// rejected, never queued. The permit releases on drop, so a panicking or
/// failing run never wedges the guard.
#[derive(Clone, Default)]
pub struct RunGuard {
    active: Arc<AtomicBool>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> Result<RunPermit, DaybriefError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DaybriefError::RunInFlight);
        }
        Ok(RunPermit {
            active: Arc::clone(&self.active),
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

pub struct RunPermit {
    active: Arc<AtomicBool>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_rejected_while_held() {
        let guard = RunGuard::new();
        let permit = guard.acquire().unwrap();
        assert!(matches!(guard.acquire(), Err(DaybriefError::RunInFlight)));
        drop(permit);
        assert!(guard.acquire().is_ok());
    }

    #[test]
    fn permit_releases_on_drop_even_mid_scope() {
        let guard = RunGuard::new();
        {
            let _permit = guard.acquire().unwrap();
            assert!(guard.is_active());
        }
        assert!(!guard.is_active());
    }

    #[test]
    fn only_one_of_many_concurrent_acquires_wins() {
        let guard = RunGuard::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = guard.clone();
                // Return the permit so winners keep holding it until all
                // threads are joined.
                std::thread::spawn(move || guard.acquire().ok())
            })
            .collect();
        let permits: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread panicked"))
            .collect();
        let wins = permits.iter().filter(|permit| permit.is_some()).count();
        assert_eq!(wins, 1);
    }
}
