//! Evaluation cadence
//!
//! Containers are evaluated every `interval + 1` ticks, where the interval is
//! the user's frame skip plus the auto-bounds skip. The host calls
//! [`Scheduler::tick`] at whatever rate it likes.

use std::collections::BTreeMap;

use crate::container::ContainerId;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Cadence {
    interval: u32,
    countdown: u32,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    entries: BTreeMap<ContainerId, Cadence>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a container; it is due on the next tick.
    pub fn register(&mut self, id: ContainerId, interval: u32) {
        self.entries.insert(id, Cadence { interval, countdown: 0 });
    }

    pub fn unregister(&mut self, id: ContainerId) {
        self.entries.remove(&id);
    }

    /// Change the interval without delaying a container that is already due.
    pub fn set_interval(&mut self, id: ContainerId, interval: u32) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.interval = interval;
            entry.countdown = entry.countdown.min(interval);
        }
    }

    pub fn interval(&self, id: ContainerId) -> Option<u32> {
        self.entries.get(&id).map(|e| e.interval)
    }

    /// Make a container due on the next tick.
    pub fn wake(&mut self, id: ContainerId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.countdown = 0;
        }
    }

    /// Advance one tick. Returns the containers due now, ascending.
    pub fn tick(&mut self) -> Vec<ContainerId> {
        let mut due = Vec::new();
        for (id, entry) in self.entries.iter_mut() {
            if entry.countdown == 0 {
                due.push(*id);
                entry.countdown = entry.interval;
            } else {
                entry.countdown -= 1;
            }
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cadence() {
        let mut s = Scheduler::new();
        s.register(ContainerId(2), 0);
        s.register(ContainerId(1), 2);
        let ticks: Vec<_> = (0..6).map(|_| s.tick()).collect();
        assert_eq!(ticks[0], vec![ContainerId(1), ContainerId(2)]);
        assert_eq!(ticks[1], vec![ContainerId(2)]);
        assert_eq!(ticks[2], vec![ContainerId(2)]);
        assert_eq!(ticks[3], vec![ContainerId(1), ContainerId(2)]);
    }

    #[test]
    fn test_wake_and_interval_change() {
        let mut s = Scheduler::new();
        s.register(ContainerId(1), 5);
        s.tick();
        assert!(s.tick().is_empty());
        s.wake(ContainerId(1));
        assert_eq!(s.tick(), vec![ContainerId(1)]);
        s.set_interval(ContainerId(1), 1);
        assert!(s.tick().is_empty());
        assert_eq!(s.tick(), vec![ContainerId(1)]);
        s.unregister(ContainerId(1));
        assert!(s.tick().is_empty());
    }
}
