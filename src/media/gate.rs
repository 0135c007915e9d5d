use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use capture_bus::attr::GroupId;

/// Enables each capture group exactly once, however many workers race to
/// activate it. Each group has its own lock so activating one group never
/// waits on another.
#[derive(Default)]
pub struct ActivationGate {
    groups: Mutex<HashMap<GroupId, Arc<Mutex<bool>>>>,
}

impl ActivationGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, group: GroupId) -> Arc<Mutex<bool>> {
        let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(groups.entry(group).or_default())
    }

    /// Runs `enable` if `group` has not been activated yet. The flag only
    /// flips on success, so a failed enable lets a later caller retry.
    /// Returns `true` if this call performed the activation.
    pub fn activate<F>(&self, group: GroupId, enable: F) -> anyhow::Result<bool>
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        let slot = self.slot(group);
        let mut active = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if *active {
            return Ok(false);
        }
        enable()?;
        *active = true;
        log::info!("capture group {} activated", group);
        Ok(true)
    }

    pub fn is_active(&self, group: GroupId) -> bool {
        let slot = self.slot(group);
        let active = slot.lock().unwrap_or_else(PoisonError::into_inner);
        *active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Barrier};
    use std::time::Duration;

    #[test]
    fn test_concurrent_activation_enables_once() {
        let gate = Arc::new(ActivationGate::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    gate.activate(0, || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(5));
                        Ok(())
                    })
                    .unwrap()
                })
            })
            .collect();

        let performed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|performed| *performed)
            .count();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(performed, 1);
        assert!(gate.is_active(0));
    }

    #[test]
    fn test_failed_enable_allows_retry() {
        let gate = ActivationGate::new();
        assert!(gate
            .activate(2, || Err(anyhow::anyhow!("device busy")))
            .is_err());
        assert!(!gate.is_active(2));
        assert!(gate.activate(2, || Ok(())).unwrap());
        assert!(!gate.activate(2, || panic!("enabled twice")).unwrap());
    }

    #[test]
    fn test_groups_do_not_block_each_other() {
        let gate = Arc::new(ActivationGate::new());
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let slow_gate = Arc::clone(&gate);
        let slow = std::thread::spawn(move || {
            slow_gate
                .activate(0, || {
                    entered_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok(())
                })
                .unwrap()
        });

        // Group 0 is now held inside its enable call.
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        let fast_gate = Arc::clone(&gate);
        let fast = std::thread::spawn(move || {
            let performed = fast_gate.activate(1, || Ok(())).unwrap();
            done_tx.send(performed).unwrap();
        });
        assert!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap());

        release_tx.send(()).unwrap();
        assert!(slow.join().unwrap());
        fast.join().unwrap();
    }
}
