//! Round-robin group: a FIFO of logical interfaces sharing a name-base +
//! family, rotated under a dedicated lock scoped around the rotation only,
//! never held across I/O.

use std::collections::VecDeque;

use parking_lot::Mutex;

use super::LogicalInterfaceId;

pub struct RrGroup {
    fifo: Mutex<VecDeque<LogicalInterfaceId>>,
    /// Shortcut set once exactly one LIF has been added; avoids taking the
    /// lock on the (very common) single-interface deployment.
    singular: Option<LogicalInterfaceId>,
}

impl RrGroup {
    pub fn new() -> Self {
        RrGroup {
            fifo: Mutex::new(VecDeque::new()),
            singular: None,
        }
    }

    pub fn push(&mut self, lif: LogicalInterfaceId) {
        let mut fifo = self.fifo.lock();
        fifo.push_back(lif);

        self.singular = if fifo.len() == 1 { Some(lif) } else { None };
    }

    /// Rotates the FIFO and returns candidates in rotation order, starting
    /// right after the one that was just picked. Caller checks each
    /// candidate's free-port availability and uses the first that passes.
    pub fn rotate(&self) -> Vec<LogicalInterfaceId> {
        if let Some(only) = self.singular {
            return vec![only];
        }

        let mut fifo = self.fifo.lock();
        if let Some(front) = fifo.pop_front() {
            fifo.push_back(front);
        }

        fifo.iter().copied().collect()
    }
}

impl Default for RrGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn rotation_cycles_fairly_over_group_of_three() {
        let mut keys: SlotMap<LogicalInterfaceId, ()> = SlotMap::with_key();
        let ids: Vec<_> = (0..3).map(|_| keys.insert(())).collect();

        let mut group = RrGroup::new();
        for id in &ids {
            group.push(*id);
        }

        let mut counts = std::collections::HashMap::new();
        let k = 9;
        for _ in 0..k {
            let candidates = group.rotate();
            let chosen = candidates[0];
            *counts.entry(chosen).or_insert(0) += 1;
        }

        for id in &ids {
            let count = counts.get(id).copied().unwrap_or(0);
            assert_eq!(count, k / ids.len());
        }
    }

    #[test]
    fn singular_group_always_returns_same_interface() {
        let mut keys: SlotMap<LogicalInterfaceId, ()> = SlotMap::with_key();
        let id = keys.insert(());

        let mut group = RrGroup::new();
        group.push(id);

        assert_eq!(group.rotate(), vec![id]);
        assert_eq!(group.rotate(), vec![id]);
    }
}
