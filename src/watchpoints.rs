//! Address watchpoints for debugging. The bus reports every access; the
//! engine records the first match as a pending hit for the run loop to pick
//! up and pause on.

/// Access kind a watchpoint fires on.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Trigger {
    Read,
    Write,
    Execute,
}

#[derive(Clone, Debug)]
pub struct Watchpoint {
    pub id: u32,
    /// Inclusive address range.
    pub start: u16,
    pub end: u16,
    pub on_read: bool,
    pub on_write: bool,
    pub on_execute: bool,
    /// When set, writes only fire if they store this value.
    pub value: Option<u8>,
}

impl Watchpoint {
    fn matches_addr(&self, addr: u16) -> bool {
        addr >= self.start && addr <= self.end
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct WatchpointHit {
    pub id: u32,
    pub trigger: Trigger,
    pub addr: u16,
    /// Value read or written; meaningless for execute hits.
    pub value: u8,
}

pub struct WatchpointEngine {
    watchpoints: Vec<Watchpoint>,
    next_id: u32,
    pending: Option<WatchpointHit>,
    /// While true the engine ignores accesses, so stepping past a hit does
    /// not re-trigger it.
    pub suspended: bool,
    any_read: bool,
    any_write: bool,
    any_execute: bool,
}

impl WatchpointEngine {
    pub fn new() -> Self {
        Self {
            watchpoints: Vec::new(),
            next_id: 1,
            pending: None,
            suspended: false,
            any_read: false,
            any_write: false,
            any_execute: false,
        }
    }

    pub fn add(&mut self, mut watchpoint: Watchpoint) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        watchpoint.id = id;
        self.watchpoints.push(watchpoint);
        self.refresh_flags();
        id
    }

    pub fn remove(&mut self, id: u32) -> bool {
        let before = self.watchpoints.len();
        self.watchpoints.retain(|w| w.id != id);
        self.refresh_flags();
        self.watchpoints.len() != before
    }

    pub fn clear(&mut self) {
        self.watchpoints.clear();
        self.refresh_flags();
    }

    fn refresh_flags(&mut self) {
        self.any_read = self.watchpoints.iter().any(|w| w.on_read);
        self.any_write = self.watchpoints.iter().any(|w| w.on_write);
        self.any_execute = self.watchpoints.iter().any(|w| w.on_execute);
    }

    pub fn take_hit(&mut self) -> Option<WatchpointHit> {
        self.pending.take()
    }

    fn record(&mut self, hit: WatchpointHit) {
        // First hit wins until the run loop consumes it.
        if self.pending.is_none() {
            self.pending = Some(hit);
        }
    }

    #[inline]
    pub fn note_read(&mut self, addr: u16, value: u8) {
        if !self.any_read || self.suspended {
            return;
        }
        if let Some(w) = self
            .watchpoints
            .iter()
            .find(|w| w.on_read && w.matches_addr(addr))
        {
            let id = w.id;
            self.record(WatchpointHit {
                id,
                trigger: Trigger::Read,
                addr,
                value,
            });
        }
    }

    #[inline]
    pub fn note_write(&mut self, addr: u16, value: u8) {
        if !self.any_write || self.suspended {
            return;
        }
        if let Some(w) = self.watchpoints.iter().find(|w| {
            w.on_write && w.matches_addr(addr) && w.value.is_none_or(|v| v == value)
        }) {
            let id = w.id;
            self.record(WatchpointHit {
                id,
                trigger: Trigger::Write,
                addr,
                value,
            });
        }
    }

    #[inline]
    pub fn note_execute(&mut self, addr: u16) {
        if !self.any_execute || self.suspended {
            return;
        }
        if let Some(w) = self
            .watchpoints
            .iter()
            .find(|w| w.on_execute && w.matches_addr(addr))
        {
            let id = w.id;
            self.record(WatchpointHit {
                id,
                trigger: Trigger::Execute,
                addr,
                value: 0,
            });
        }
    }
}

impl Default for WatchpointEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_watch(start: u16, end: u16, value: Option<u8>) -> Watchpoint {
        Watchpoint {
            id: 0,
            start,
            end,
            on_read: false,
            on_write: true,
            on_execute: false,
            value,
        }
    }

    #[test]
    fn write_hit_in_range_only() {
        let mut engine = WatchpointEngine::new();
        let id = engine.add(write_watch(0xC000, 0xC0FF, None));
        engine.note_write(0xBFFF, 0x11);
        assert!(engine.take_hit().is_none());
        engine.note_write(0xC080, 0x22);
        let hit = engine.take_hit().unwrap();
        assert_eq!(hit.id, id);
        assert_eq!(hit.trigger, Trigger::Write);
        assert_eq!(hit.addr, 0xC080);
        assert_eq!(hit.value, 0x22);
    }

    #[test]
    fn value_filter_applies_to_writes() {
        let mut engine = WatchpointEngine::new();
        engine.add(write_watch(0xFF40, 0xFF40, Some(0x00)));
        engine.note_write(0xFF40, 0x91);
        assert!(engine.take_hit().is_none());
        engine.note_write(0xFF40, 0x00);
        assert!(engine.take_hit().is_some());
    }

    #[test]
    fn first_hit_wins_until_taken() {
        let mut engine = WatchpointEngine::new();
        engine.add(write_watch(0x0000, 0xFFFF, None));
        engine.note_write(0x1000, 0xAA);
        engine.note_write(0x2000, 0xBB);
        assert_eq!(engine.take_hit().unwrap().addr, 0x1000);
        engine.note_write(0x2000, 0xBB);
        assert_eq!(engine.take_hit().unwrap().addr, 0x2000);
    }

    #[test]
    fn suspended_engine_ignores_accesses() {
        let mut engine = WatchpointEngine::new();
        engine.add(Watchpoint {
            id: 0,
            start: 0x0150,
            end: 0x0150,
            on_read: false,
            on_write: false,
            on_execute: true,
            value: None,
        });
        engine.suspended = true;
        engine.note_execute(0x0150);
        assert!(engine.take_hit().is_none());
        engine.suspended = false;
        engine.note_execute(0x0150);
        assert!(engine.take_hit().is_some());
    }

    #[test]
    fn remove_drops_the_watchpoint() {
        let mut engine = WatchpointEngine::new();
        let id = engine.add(write_watch(0xD000, 0xD000, None));
        assert!(engine.remove(id));
        assert!(!engine.remove(id));
        engine.note_write(0xD000, 0x01);
        assert!(engine.take_hit().is_none());
    }
}
