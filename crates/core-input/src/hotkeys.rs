//! The hotkey state machine: modifier tracking plus the single dispatch
//! point that decides whether a key event is handled here or forwarded to
//! the active terminal.
//!
//! Dispatch is a pure function of (modifier state, active-terminal
//! presence, code, value) so every row of the table can be unit tested
//! without devices.

use bitflags::bitflags;
use core_term::{KeySym, MAX_STD_TERMINALS};
use input_linux::sys as keys;

use crate::keys::{base_ascii, control_fold, non_ascii, search_modified};

const KEY_DOWN: i32 = 1;
const KEY_REPEAT: i32 = 2;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Mods: u8 {
        const SHIFT = 1 << 0;
        const CONTROL = 1 << 1;
        const ALT = 1 << 2;
        const SEARCH = 1 << 3;
    }
}

/// Tracked modifier state, updated from down/up transitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModState(Mods);

impl ModState {
    pub fn mods(&self) -> Mods {
        self.0
    }

    /// Apply a key event if it is a modifier; returns true when consumed.
    fn update(&mut self, code: u16, value: i32) -> bool {
        let flag = match i32::from(code) {
            keys::KEY_LEFTSHIFT | keys::KEY_RIGHTSHIFT => Mods::SHIFT,
            keys::KEY_LEFTCTRL | keys::KEY_RIGHTCTRL => Mods::CONTROL,
            keys::KEY_LEFTALT | keys::KEY_RIGHTALT => Mods::ALT,
            keys::KEY_LEFTMETA | keys::KEY_RIGHTMETA => Mods::SEARCH,
            _ => return false,
        };
        self.0.set(flag, value != 0);
        true
    }
}

/// What the dispatcher decided about one key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Handled (or deliberately dropped); nothing reaches the terminal.
    Consumed,
    /// Deliver to the active terminal's emulator.
    Forward(KeySym),
    ScrollPageUp,
    ScrollPageDown,
    ScrollLineUp,
    ScrollLineDown,
    BrightnessUp,
    BrightnessDown,
    /// Ctrl+Alt+F1: leave the console, hand the display back.
    SwitchToBackground,
    /// Ctrl+Alt+F2..: switch to the 0-based standard terminal slot.
    SwitchVt(usize),
}

fn is_pointer_button(code: u16) -> bool {
    matches!(
        i32::from(code),
        keys::BTN_LEFT
            | keys::BTN_RIGHT
            | keys::BTN_MIDDLE
            | keys::BTN_SIDE
            | keys::BTN_EXTRA
            | keys::BTN_TOUCH
            | keys::BTN_TOOL_FINGER
            | keys::BTN_TOOL_DOUBLETAP
            | keys::BTN_TOOL_TRIPLETAP
            | keys::BTN_TOOL_QUADTAP
    )
}

fn fkey_number(code: u16) -> Option<u8> {
    let n = match i32::from(code) {
        keys::KEY_F1 => 1,
        keys::KEY_F2 => 2,
        keys::KEY_F3 => 3,
        keys::KEY_F4 => 4,
        keys::KEY_F5 => 5,
        keys::KEY_F6 => 6,
        keys::KEY_F7 => 7,
        keys::KEY_F8 => 8,
        keys::KEY_F9 => 9,
        keys::KEY_F10 => 10,
        keys::KEY_F11 => 11,
        keys::KEY_F12 => 12,
        _ => return None,
    };
    Some(n)
}

/// Classify one key event against the current modifier state.
pub fn dispatch(state: &mut ModState, has_active_terminal: bool, code: u16, value: i32) -> Action {
    if is_pointer_button(code) {
        return Action::Consumed;
    }
    if state.update(code, value) {
        return Action::Consumed;
    }

    // Everything below acts on presses; releases of normal keys are dropped.
    if value != KEY_DOWN && value != KEY_REPEAT {
        return Action::Consumed;
    }

    let mods = state.mods();
    let code_i = i32::from(code);

    if has_active_terminal && mods == Mods::SHIFT && code_i == keys::KEY_PAGEUP {
        return Action::ScrollPageUp;
    }
    if has_active_terminal && mods == Mods::SHIFT && code_i == keys::KEY_PAGEDOWN {
        return Action::ScrollPageDown;
    }
    if has_active_terminal
        && (mods == Mods::SHIFT || mods == Mods::SHIFT | Mods::SEARCH)
        && (code_i == keys::KEY_UP || code_i == keys::KEY_DOWN)
    {
        // Shift+arrow scrolls a line; Search upgrades it to a page.
        let page = mods.contains(Mods::SEARCH);
        return match (code_i == keys::KEY_UP, page) {
            (true, true) => Action::ScrollPageUp,
            (true, false) => Action::ScrollLineUp,
            (false, true) => Action::ScrollPageDown,
            (false, false) => Action::ScrollLineDown,
        };
    }

    if has_active_terminal && mods.is_empty() && code_i == keys::KEY_F6 {
        return Action::BrightnessDown;
    }
    if has_active_terminal && mods.is_empty() && code_i == keys::KEY_F7 {
        return Action::BrightnessUp;
    }

    // Reserved for external debugging tools.
    if mods.contains(Mods::CONTROL | Mods::ALT | Mods::SHIFT) {
        return Action::Consumed;
    }

    if mods == Mods::CONTROL | Mods::ALT {
        if let Some(n) = fkey_number(code) {
            if n == 1 {
                return Action::SwitchToBackground;
            }
            let slot = usize::from(n) - 2;
            if slot < MAX_STD_TERMINALS {
                return Action::SwitchVt(slot);
            }
            return Action::Consumed;
        }
    }

    // Remaining F-keys never reach the terminal.
    if has_active_terminal && fkey_number(code).is_some() && !mods.contains(Mods::SEARCH) {
        return Action::Consumed;
    }

    translate(mods, code)
}

fn translate(mods: Mods, code: u16) -> Action {
    if mods.contains(Mods::SEARCH) {
        if let Some(sym) = search_modified(code) {
            return Action::Forward(sym);
        }
    }
    if let Some(sym) = non_ascii(code) {
        return Action::Forward(sym);
    }
    if let Some(ch) = base_ascii(code, mods.contains(Mods::SHIFT)) {
        let ch = if mods.contains(Mods::CONTROL) {
            control_fold(ch)
        } else {
            ch
        };
        return Action::Forward(KeySym::Char(ch));
    }
    Action::Consumed
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn press(state: &mut ModState, active: bool, code: i32) -> Action {
        dispatch(state, active, code as u16, KEY_DOWN)
    }

    fn release(state: &mut ModState, active: bool, code: i32) -> Action {
        dispatch(state, active, code as u16, 0)
    }

    #[test]
    fn plain_keys_forward_while_active() {
        let mut st = ModState::default();
        assert_eq!(
            press(&mut st, true, keys::KEY_H),
            Action::Forward(KeySym::Char('h'))
        );
        assert_eq!(
            press(&mut st, true, keys::KEY_ENTER),
            Action::Forward(KeySym::Char('\r'))
        );
    }

    #[test]
    fn shift_page_up_scrolls_and_releases_consume() {
        // Scenario: LeftShift down, PageUp down, PageUp up, LeftShift up.
        let mut st = ModState::default();
        assert_eq!(press(&mut st, true, keys::KEY_LEFTSHIFT), Action::Consumed);
        assert_eq!(press(&mut st, true, keys::KEY_PAGEUP), Action::ScrollPageUp);
        assert_eq!(release(&mut st, true, keys::KEY_PAGEUP), Action::Consumed);
        assert_eq!(release(&mut st, true, keys::KEY_LEFTSHIFT), Action::Consumed);
        assert!(st.mods().is_empty());
    }

    #[test]
    fn shift_arrows_scroll_lines_and_search_upgrades_to_pages() {
        let mut st = ModState::default();
        press(&mut st, true, keys::KEY_LEFTSHIFT);
        assert_eq!(press(&mut st, true, keys::KEY_UP), Action::ScrollLineUp);
        press(&mut st, true, keys::KEY_LEFTMETA);
        assert_eq!(press(&mut st, true, keys::KEY_UP), Action::ScrollPageUp);
        assert_eq!(press(&mut st, true, keys::KEY_DOWN), Action::ScrollPageDown);
    }

    #[test]
    fn vt_switch_chords() {
        let mut st = ModState::default();
        press(&mut st, true, keys::KEY_LEFTCTRL);
        press(&mut st, true, keys::KEY_LEFTALT);
        assert_eq!(press(&mut st, true, keys::KEY_F1), Action::SwitchToBackground);
        assert_eq!(press(&mut st, true, keys::KEY_F2), Action::SwitchVt(0));
        assert_eq!(press(&mut st, true, keys::KEY_F4), Action::SwitchVt(2));
        // Beyond the table: consumed, not forwarded.
        assert_eq!(press(&mut st, true, keys::KEY_F9), Action::Consumed);
    }

    #[test]
    fn ctrl_alt_shift_is_reserved() {
        let mut st = ModState::default();
        press(&mut st, true, keys::KEY_LEFTCTRL);
        press(&mut st, true, keys::KEY_LEFTALT);
        press(&mut st, true, keys::KEY_LEFTSHIFT);
        assert_eq!(press(&mut st, true, keys::KEY_T), Action::Consumed);
        assert_eq!(press(&mut st, true, keys::KEY_F2), Action::Consumed);
    }

    #[test]
    fn brightness_keys_require_a_bare_press() {
        let mut st = ModState::default();
        assert_eq!(press(&mut st, true, keys::KEY_F6), Action::BrightnessDown);
        assert_eq!(press(&mut st, true, keys::KEY_F7), Action::BrightnessUp);
        press(&mut st, true, keys::KEY_LEFTSHIFT);
        assert_eq!(press(&mut st, true, keys::KEY_F6), Action::Consumed);
    }

    #[test]
    fn fkeys_are_consumed_while_active() {
        let mut st = ModState::default();
        assert_eq!(press(&mut st, true, keys::KEY_F8), Action::Consumed);
        assert_eq!(press(&mut st, true, keys::KEY_F10), Action::Consumed);
    }

    #[test]
    fn search_layer_forwards_fkeys_and_arrow_jumps() {
        let mut st = ModState::default();
        press(&mut st, true, keys::KEY_LEFTMETA);
        assert_eq!(
            press(&mut st, true, keys::KEY_F8),
            Action::Forward(KeySym::F(8))
        );
        assert_eq!(
            press(&mut st, true, keys::KEY_LEFT),
            Action::Forward(KeySym::Home)
        );
    }

    #[test]
    fn control_folds_letters() {
        let mut st = ModState::default();
        press(&mut st, true, keys::KEY_LEFTCTRL);
        assert_eq!(
            press(&mut st, true, keys::KEY_C),
            Action::Forward(KeySym::Char('\u{3}'))
        );
    }

    #[test]
    fn pointer_buttons_are_ignored() {
        let mut st = ModState::default();
        assert_eq!(press(&mut st, true, keys::BTN_LEFT), Action::Consumed);
        assert_eq!(press(&mut st, true, keys::BTN_TOUCH), Action::Consumed);
    }

    proptest! {
        /// Modifier tracking always equals the latest down/up transition of
        /// each modifier, regardless of what is interleaved.
        #[test]
        fn modifier_state_is_consistent(events in proptest::collection::vec(
            (prop_oneof![
                Just(keys::KEY_LEFTSHIFT),
                Just(keys::KEY_LEFTCTRL),
                Just(keys::KEY_LEFTALT),
                Just(keys::KEY_LEFTMETA),
                Just(keys::KEY_A),
                Just(keys::KEY_F2),
            ], prop_oneof![Just(0i32), Just(1i32), Just(2i32)]),
            0..50,
        )) {
            let mut st = ModState::default();
            let mut expect = Mods::empty();
            for (code, value) in events {
                let flag = match code {
                    keys::KEY_LEFTSHIFT => Some(Mods::SHIFT),
                    keys::KEY_LEFTCTRL => Some(Mods::CONTROL),
                    keys::KEY_LEFTALT => Some(Mods::ALT),
                    keys::KEY_LEFTMETA => Some(Mods::SEARCH),
                    _ => None,
                };
                dispatch(&mut st, true, code as u16, value);
                if let Some(flag) = flag {
                    expect.set(flag, value != 0);
                }
                prop_assert_eq!(st.mods(), expect);
            }
        }
    }
}
