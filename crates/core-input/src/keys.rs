//! Scancode translation tables.
//!
//! Three layers, tried in order by the dispatcher: the search-modifier table
//! (only when Search is held), the non-ASCII table, then the base ASCII
//! table indexed by `(code, shift)`. Control folding happens after a base
//! table hit.

use core_term::KeySym;
use input_linux::sys as keys;

/// `(code, unshifted, shifted)` rows of the base ASCII table. One table
/// serves both directions: translation and the reverse lookup used to echo
/// keys in diagnostics.
static BASE_ASCII: &[(u16, char, char)] = &[
    (keys::KEY_1 as u16, '1', '!'),
    (keys::KEY_2 as u16, '2', '@'),
    (keys::KEY_3 as u16, '3', '#'),
    (keys::KEY_4 as u16, '4', '$'),
    (keys::KEY_5 as u16, '5', '%'),
    (keys::KEY_6 as u16, '6', '^'),
    (keys::KEY_7 as u16, '7', '&'),
    (keys::KEY_8 as u16, '8', '*'),
    (keys::KEY_9 as u16, '9', '('),
    (keys::KEY_0 as u16, '0', ')'),
    (keys::KEY_MINUS as u16, '-', '_'),
    (keys::KEY_EQUAL as u16, '=', '+'),
    (keys::KEY_Q as u16, 'q', 'Q'),
    (keys::KEY_W as u16, 'w', 'W'),
    (keys::KEY_E as u16, 'e', 'E'),
    (keys::KEY_R as u16, 'r', 'R'),
    (keys::KEY_T as u16, 't', 'T'),
    (keys::KEY_Y as u16, 'y', 'Y'),
    (keys::KEY_U as u16, 'u', 'U'),
    (keys::KEY_I as u16, 'i', 'I'),
    (keys::KEY_O as u16, 'o', 'O'),
    (keys::KEY_P as u16, 'p', 'P'),
    (keys::KEY_LEFTBRACE as u16, '[', '{'),
    (keys::KEY_RIGHTBRACE as u16, ']', '}'),
    (keys::KEY_A as u16, 'a', 'A'),
    (keys::KEY_S as u16, 's', 'S'),
    (keys::KEY_D as u16, 'd', 'D'),
    (keys::KEY_F as u16, 'f', 'F'),
    (keys::KEY_G as u16, 'g', 'G'),
    (keys::KEY_H as u16, 'h', 'H'),
    (keys::KEY_J as u16, 'j', 'J'),
    (keys::KEY_K as u16, 'k', 'K'),
    (keys::KEY_L as u16, 'l', 'L'),
    (keys::KEY_SEMICOLON as u16, ';', ':'),
    (keys::KEY_APOSTROPHE as u16, '\'', '"'),
    (keys::KEY_GRAVE as u16, '`', '~'),
    (keys::KEY_BACKSLASH as u16, '\\', '|'),
    (keys::KEY_Z as u16, 'z', 'Z'),
    (keys::KEY_X as u16, 'x', 'X'),
    (keys::KEY_C as u16, 'c', 'C'),
    (keys::KEY_V as u16, 'v', 'V'),
    (keys::KEY_B as u16, 'b', 'B'),
    (keys::KEY_N as u16, 'n', 'N'),
    (keys::KEY_M as u16, 'm', 'M'),
    (keys::KEY_COMMA as u16, ',', '<'),
    (keys::KEY_DOT as u16, '.', '>'),
    (keys::KEY_SLASH as u16, '/', '?'),
    (keys::KEY_SPACE as u16, ' ', ' '),
    (keys::KEY_ENTER as u16, '\r', '\r'),
    (keys::KEY_TAB as u16, '\t', '\t'),
    (keys::KEY_BACKSPACE as u16, '\u{7f}', '\u{7f}'),
];

/// Base printable translation for `(code, shift)`.
pub fn base_ascii(code: u16, shift: bool) -> Option<char> {
    BASE_ASCII
        .iter()
        .find(|&&(c, _, _)| c == code)
        .map(|&(_, plain, shifted)| if shift { shifted } else { plain })
}

/// Reverse lookup: which `(code, shift)` produces `ch`. Prefers the
/// unshifted form when both produce the same character.
pub fn reverse_ascii(ch: char) -> Option<(u16, bool)> {
    for &(code, plain, shifted) in BASE_ASCII {
        if plain == ch {
            return Some((code, false));
        }
        if shifted == ch {
            return Some((code, true));
        }
    }
    None
}

/// Non-printable keys every layout shares.
pub fn non_ascii(code: u16) -> Option<KeySym> {
    let sym = match i32::from(code) {
        keys::KEY_ESC => KeySym::Esc,
        keys::KEY_HOME => KeySym::Home,
        keys::KEY_END => KeySym::End,
        keys::KEY_UP => KeySym::Up,
        keys::KEY_DOWN => KeySym::Down,
        keys::KEY_LEFT => KeySym::Left,
        keys::KEY_RIGHT => KeySym::Right,
        keys::KEY_PAGEUP => KeySym::PageUp,
        keys::KEY_PAGEDOWN => KeySym::PageDown,
        keys::KEY_INSERT => KeySym::Insert,
        keys::KEY_DELETE => KeySym::Delete,
        _ => return None,
    };
    Some(sym)
}

/// Translations that apply only while Search is held: the top row keeps its
/// F-key meaning and the arrows jump by pages and line ends.
pub fn search_modified(code: u16) -> Option<KeySym> {
    let sym = match i32::from(code) {
        keys::KEY_F1 => KeySym::F(1),
        keys::KEY_F2 => KeySym::F(2),
        keys::KEY_F3 => KeySym::F(3),
        keys::KEY_F4 => KeySym::F(4),
        keys::KEY_F5 => KeySym::F(5),
        keys::KEY_F6 => KeySym::F(6),
        keys::KEY_F7 => KeySym::F(7),
        keys::KEY_F8 => KeySym::F(8),
        keys::KEY_F9 => KeySym::F(9),
        keys::KEY_F10 => KeySym::F(10),
        keys::KEY_UP => KeySym::PageUp,
        keys::KEY_DOWN => KeySym::PageDown,
        keys::KEY_LEFT => KeySym::Home,
        keys::KEY_RIGHT => KeySym::End,
        _ => return None,
    };
    Some(sym)
}

/// Fold an ASCII letter with Control held into its control character.
pub fn control_fold(ch: char) -> char {
    if ch.is_ascii_alphabetic() {
        let c = ch.to_ascii_lowercase() as u8;
        (c - b'a' + 1) as char
    } else {
        ch
    }
}
