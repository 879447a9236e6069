//! The fixed table of terminal slots.
//!
//! Invariants:
//! * at most one terminal is active at a time;
//! * `current` always indexes the table, occupied or not;
//! * the last slot is reserved for the splash terminal.

use anyhow::Result;
use tracing::error;

use crate::terminal::{TermOptions, Terminal};

/// Terminals reachable through Ctrl+Alt+F2..F(1+N) and the VT RPCs.
pub const MAX_STD_TERMINALS: usize = 3;
/// Index of the reserved splash slot.
pub const SPLASH_TERMINAL: usize = MAX_STD_TERMINALS;
pub const MAX_TERMINALS: usize = MAX_STD_TERMINALS + 1;

#[derive(Debug, Default)]
pub struct TerminalTable {
    slots: [Option<Terminal>; MAX_TERMINALS],
    current: usize,
}

impl TerminalTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index: usize) -> Option<&Terminal> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Terminal> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    pub fn set(&mut self, index: usize, terminal: Option<Terminal>) {
        if index >= MAX_TERMINALS {
            error!(target: "term.table", index, "slot out of range");
            return;
        }
        self.slots[index] = terminal;
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn set_current(&mut self, index: usize) {
        if index >= MAX_TERMINALS {
            error!(target: "term.table", index, "current out of range");
            return;
        }
        self.current = index;
    }

    pub fn current(&self) -> Option<&Terminal> {
        self.get(self.current)
    }

    pub fn current_mut(&mut self) -> Option<&mut Terminal> {
        self.get_mut(self.current)
    }

    /// Point `current` at an occupied slot by matching the bridge fd, or
    /// clear the current slot and reset to 0 for `None` (the splash
    /// relinquishing control).
    pub fn set_current_to(&mut self, bridge_fd: Option<std::os::fd::RawFd>) {
        let Some(fd) = bridge_fd else {
            self.slots[self.current] = None;
            self.current = 0;
            return;
        };
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.as_ref().is_some_and(|t| t.bridge_fd() == fd) {
                self.current = i;
                return;
            }
        }
        error!(target: "term.table", "terminal not in table");
    }

    /// Any slot whose terminal is active.
    pub fn active_index(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(Terminal::is_active))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut Terminal)> + '_ {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, s)| s.as_mut().map(|t| (i, t)))
    }

    /// Ensure a (non-interactive) terminal exists for 1-based VT number
    /// `vt`; returns its slot index.
    pub fn create_term(&mut self, vt: usize, opts: &TermOptions) -> Result<usize> {
        let index = vt - 1;
        if self.get(index).is_none() {
            let terminal = Terminal::new(false, opts)?;
            self.set(index, Some(terminal));
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headless() -> TermOptions {
        TermOptions::default()
    }

    #[test]
    fn empty_table_has_no_active_terminal() {
        let table = TerminalTable::new();
        assert_eq!(table.current_index(), 0);
        assert!(table.current().is_none());
        assert!(table.active_index().is_none());
    }

    #[test]
    fn create_term_is_idempotent() {
        let mut table = TerminalTable::new();
        let index = table.create_term(2, &headless()).unwrap();
        assert_eq!(index, 1);
        let fd = table.get(1).unwrap().bridge_fd();
        let again = table.create_term(2, &headless()).unwrap();
        assert_eq!(again, 1);
        assert_eq!(table.get(1).unwrap().bridge_fd(), fd);
    }

    #[test]
    fn at_most_one_terminal_is_active() {
        let mut table = TerminalTable::new();
        table.create_term(1, &headless()).unwrap();
        table.create_term(2, &headless()).unwrap();

        table.get_mut(0).unwrap().activate().unwrap();
        assert_eq!(table.active_index(), Some(0));

        // Switching deactivates before activating, keeping the invariant.
        table.get_mut(0).unwrap().deactivate();
        table.get_mut(1).unwrap().activate().unwrap();
        let active: Vec<usize> = (0..MAX_TERMINALS)
            .filter(|&i| table.get(i).is_some_and(Terminal::is_active))
            .collect();
        assert_eq!(active, vec![1]);
    }

    #[test]
    fn set_current_to_finds_and_resets() {
        let mut table = TerminalTable::new();
        table.create_term(1, &headless()).unwrap();
        table.create_term(3, &headless()).unwrap();
        let fd = table.get(2).unwrap().bridge_fd();

        table.set_current_to(Some(fd));
        assert_eq!(table.current_index(), 2);

        table.set_current_to(None);
        assert_eq!(table.current_index(), 0);
        assert!(table.get(2).is_none());
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let mut table = TerminalTable::new();
        table.set_current(MAX_TERMINALS);
        assert_eq!(table.current_index(), 0);
    }
}
