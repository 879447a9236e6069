//! VT glue: the escape-sequence parser feeding the screen, plus keyboard
//! encoding back toward the PTY.
//!
//! The byte-level state machine is the `vte` parser; this module owns what
//! the sequences *mean* for the screen. Coverage is the xterm subset a getty,
//! a shell and full-screen tools actually emit; unknown sequences are dropped
//! on the floor (with a trace event so they can be chased when something
//! renders oddly).

use tracing::trace;
use vte::{Params, Parser, Perform};

use crate::osc::{self, GfxCommand};
use crate::screen::Screen;

/// A decoded key as handed to the emulator, after the input layer has
/// applied its translation tables (including control folding).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySym {
    Char(char),
    Enter,
    Esc,
    Backspace,
    Tab,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    Delete,
    F(u8),
}

/// Encode a key into the byte sequence a PTY child expects (xterm flavor).
pub fn encode_keysym(sym: KeySym, out: &mut Vec<u8>) {
    match sym {
        KeySym::Char(c) => {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        }
        KeySym::Enter => out.push(b'\r'),
        KeySym::Esc => out.push(0x1b),
        KeySym::Backspace => out.push(0x7f),
        KeySym::Tab => out.push(b'\t'),
        KeySym::Up => out.extend_from_slice(b"\x1b[A"),
        KeySym::Down => out.extend_from_slice(b"\x1b[B"),
        KeySym::Right => out.extend_from_slice(b"\x1b[C"),
        KeySym::Left => out.extend_from_slice(b"\x1b[D"),
        KeySym::Home => out.extend_from_slice(b"\x1b[H"),
        KeySym::End => out.extend_from_slice(b"\x1b[F"),
        KeySym::PageUp => out.extend_from_slice(b"\x1b[5~"),
        KeySym::PageDown => out.extend_from_slice(b"\x1b[6~"),
        KeySym::Insert => out.extend_from_slice(b"\x1b[2~"),
        KeySym::Delete => out.extend_from_slice(b"\x1b[3~"),
        KeySym::F(n) => match n {
            1 => out.extend_from_slice(b"\x1bOP"),
            2 => out.extend_from_slice(b"\x1bOQ"),
            3 => out.extend_from_slice(b"\x1bOR"),
            4 => out.extend_from_slice(b"\x1bOS"),
            5 => out.extend_from_slice(b"\x1b[15~"),
            6 => out.extend_from_slice(b"\x1b[17~"),
            7 => out.extend_from_slice(b"\x1b[18~"),
            8 => out.extend_from_slice(b"\x1b[19~"),
            9 => out.extend_from_slice(b"\x1b[20~"),
            10 => out.extend_from_slice(b"\x1b[21~"),
            11 => out.extend_from_slice(b"\x1b[23~"),
            12 => out.extend_from_slice(b"\x1b[24~"),
            _ => {}
        },
    }
}

/// The emulator: screen state plus the parser that drives it.
pub struct Vt {
    screen: Screen,
    parser: Parser,
    pending_gfx: Vec<GfxCommand>,
    enable_gfx: bool,
}

impl std::fmt::Debug for Vt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vt")
            .field("screen", &self.screen)
            .field("enable_gfx", &self.enable_gfx)
            .finish_non_exhaustive()
    }
}

impl Vt {
    pub fn new(cols: usize, rows: usize, scrollback: usize, enable_gfx: bool) -> Self {
        Self {
            screen: Screen::new(cols, rows, scrollback),
            parser: Parser::new(),
            pending_gfx: Vec::new(),
            enable_gfx,
        }
    }

    /// Feed bytes read from the PTY through the state machine.
    pub fn input(&mut self, bytes: &[u8]) {
        let Self {
            screen,
            parser,
            pending_gfx,
            enable_gfx,
        } = self;
        let mut performer = Performer {
            screen,
            gfx: pending_gfx,
            enable_gfx: *enable_gfx,
        };
        for &byte in bytes {
            parser.advance(&mut performer, byte);
        }
    }

    /// Graphics commands decoded since the last call.
    pub fn take_gfx(&mut self) -> Vec<GfxCommand> {
        std::mem::take(&mut self.pending_gfx)
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    pub fn screen_mut(&mut self) -> &mut Screen {
        &mut self.screen
    }
}

struct Performer<'a> {
    screen: &'a mut Screen,
    gfx: &'a mut Vec<GfxCommand>,
    enable_gfx: bool,
}

fn first(params: &Params, default: u16) -> u16 {
    let v = params.iter().next().map(|p| p[0]).unwrap_or(0);
    if v == 0 {
        default
    } else {
        v
    }
}

fn nth(params: &Params, n: usize) -> u16 {
    params.iter().nth(n).map(|p| p[0]).unwrap_or(0)
}

impl Perform for Performer<'_> {
    fn print(&mut self, c: char) {
        self.screen.put_char(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            0x08 => self.screen.backspace(),
            0x09 => self.screen.tab(),
            0x0a..=0x0c => self.screen.line_feed(),
            0x0d => self.screen.carriage_return(),
            _ => {}
        }
    }

    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], ignore: bool, action: char) {
        if ignore {
            return;
        }

        if intermediates.first() == Some(&b'?') {
            let mode = nth(params, 0);
            match (mode, action) {
                (25, 'h') => self.screen.set_cursor_visible(true),
                (25, 'l') => self.screen.set_cursor_visible(false),
                (7, 'h') => self.screen.set_autowrap(true),
                (7, 'l') => self.screen.set_autowrap(false),
                _ => trace!(target: "term.vt", mode, %action, "private mode ignored"),
            }
            return;
        }
        if !intermediates.is_empty() {
            return;
        }

        let n = first(params, 1) as usize;
        match action {
            'A' => self.screen.move_rel(0, -(n as isize)),
            'B' | 'e' => self.screen.move_rel(0, n as isize),
            'C' | 'a' => self.screen.move_rel(n as isize, 0),
            'D' => self.screen.move_rel(-(n as isize), 0),
            'G' | '`' => self.screen.move_cursor(n - 1, self.screen.cursor().1),
            'd' => self.screen.move_cursor(self.screen.cursor().0, n - 1),
            'H' | 'f' => {
                let row = first(params, 1) as usize;
                let col = params.iter().nth(1).map(|p| p[0]).unwrap_or(1).max(1) as usize;
                self.screen.move_cursor(col - 1, row - 1);
            }
            'J' => self.screen.erase_display(nth(params, 0)),
            'K' => self.screen.erase_line(nth(params, 0)),
            'L' => self.screen.insert_lines(n),
            'M' => self.screen.delete_lines(n),
            '@' => self.screen.insert_chars(n),
            'P' => self.screen.delete_chars(n),
            'X' => self.screen.erase_chars(n),
            'S' => self.screen.scroll_up(n),
            'T' => self.screen.scroll_down(n),
            'r' => {
                let top = first(params, 1) as usize;
                let bot = params.iter().nth(1).map(|p| p[0]).unwrap_or(0) as usize;
                let bot = if bot == 0 { self.screen.rows() } else { bot };
                self.screen.set_scroll_region(top, bot);
            }
            'm' => self.sgr(params),
            's' => self.screen.save_cursor(),
            'u' => self.screen.restore_cursor(),
            _ => trace!(target: "term.vt", %action, "CSI ignored"),
        }
    }

    fn esc_dispatch(&mut self, intermediates: &[u8], _ignore: bool, byte: u8) {
        if !intermediates.is_empty() {
            return;
        }
        match byte {
            b'D' => self.screen.line_feed(),
            b'E' => {
                self.screen.carriage_return();
                self.screen.line_feed();
            }
            b'M' => self.screen.reverse_index(),
            b'7' => self.screen.save_cursor(),
            b'8' => self.screen.restore_cursor(),
            b'c' => self.screen.reset(),
            _ => {}
        }
    }

    fn osc_dispatch(&mut self, params: &[&[u8]], _bell_terminated: bool) {
        if !self.enable_gfx {
            return;
        }
        // The parser splits the payload on ';'; the option grammar uses the
        // same separator, so rejoin before parsing.
        let mut payload = Vec::new();
        for (i, part) in params.iter().enumerate() {
            if i > 0 {
                payload.push(b';');
            }
            payload.extend_from_slice(part);
        }
        if let Some(cmd) = osc::parse_gfx(&payload) {
            self.gfx.push(cmd);
        }
    }

    fn hook(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _action: char) {}
    fn put(&mut self, _byte: u8) {}
    fn unhook(&mut self) {}
}

impl Performer<'_> {
    fn sgr(&mut self, params: &Params) {
        let flat: Vec<u16> = params.iter().map(|p| p[0]).collect();
        if flat.is_empty() {
            self.screen.sgr_reset();
            return;
        }

        let mut i = 0;
        while i < flat.len() {
            match flat[i] {
                0 => self.screen.sgr_reset(),
                1 => self.screen.set_bold(true),
                22 => self.screen.set_bold(false),
                7 => self.screen.set_inverse(true),
                27 => self.screen.set_inverse(false),
                30..=37 => self.screen.set_fg_indexed((flat[i] - 30) as u8),
                39 => self.screen.set_default_fg(),
                40..=47 => self.screen.set_bg_indexed((flat[i] - 40) as u8),
                49 => self.screen.set_default_bg(),
                90..=97 => self.screen.set_fg_indexed((flat[i] - 90 + 8) as u8),
                100..=107 => self.screen.set_bg_indexed((flat[i] - 100 + 8) as u8),
                38 | 48 => {
                    let bg = flat[i] == 48;
                    match flat.get(i + 1).copied() {
                        Some(5) => {
                            let idx = flat.get(i + 2).copied().unwrap_or(0).min(255) as u8;
                            if bg {
                                self.screen.set_bg_indexed(idx);
                            } else {
                                self.screen.set_fg_indexed(idx);
                            }
                            i += 2;
                        }
                        Some(2) => {
                            let c = |o: usize| {
                                u32::from(flat.get(i + o).copied().unwrap_or(0).min(255))
                            };
                            let rgb = (c(2) << 16) | (c(3) << 8) | c(4);
                            if bg {
                                self.screen.set_bg_rgb(rgb);
                            } else {
                                self.screen.set_fg_rgb(rgb);
                            }
                            i += 4;
                        }
                        _ => {}
                    }
                }
                other => trace!(target: "term.vt", sgr = other, "SGR ignored"),
            }
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::PALETTE_BASE;
    use crate::osc::GfxCommand;
    use pretty_assertions::assert_eq;

    fn screen_text(vt: &mut Vt) -> Vec<String> {
        let rows = vt.screen().rows();
        let cols = vt.screen().cols();
        let mut out = vec![vec![' '; cols]; rows];
        vt.screen_mut().draw(|cell| {
            out[cell.row][cell.col] = cell.ch.unwrap_or(' ');
        });
        out.into_iter()
            .map(|r| r.into_iter().collect::<String>().trim_end().to_string())
            .collect()
    }

    #[test]
    fn prints_plain_text_with_crlf() {
        let mut vt = Vt::new(10, 3, 0, false);
        vt.input(b"hello\r\nworld");
        assert_eq!(screen_text(&mut vt), vec!["hello", "world", ""]);
    }

    #[test]
    fn cursor_addressing() {
        let mut vt = Vt::new(10, 3, 0, false);
        vt.input(b"\x1b[2;4Hx");
        let mut hit = None;
        vt.screen_mut().draw(|c| {
            if c.ch == Some('x') {
                hit = Some((c.col, c.row));
            }
        });
        assert_eq!(hit, Some((3, 1)));
    }

    #[test]
    fn sgr_sets_colors_and_inverse() {
        let mut vt = Vt::new(4, 1, 0, false);
        vt.input(b"\x1b[31;46;7mx");
        let mut attrs = None;
        vt.screen_mut().draw(|c| {
            if c.ch == Some('x') {
                attrs = Some(c.attrs);
            }
        });
        let attrs = attrs.unwrap();
        assert_eq!(attrs.fg, PALETTE_BASE[1]);
        assert_eq!(attrs.bg, PALETTE_BASE[6]);
        assert!(attrs.flags.contains(crate::screen::AttrFlags::INVERSE));
    }

    #[test]
    fn sgr_256_and_truecolor() {
        let mut vt = Vt::new(4, 1, 0, false);
        vt.input(b"\x1b[38;5;196m\x1b[48;2;1;2;3mx");
        let mut attrs = None;
        vt.screen_mut().draw(|c| {
            if c.ch == Some('x') {
                attrs = Some(c.attrs);
            }
        });
        let attrs = attrs.unwrap();
        assert_eq!(attrs.fg, 0xFF0000);
        assert_eq!(attrs.bg, 0x010203);
    }

    #[test]
    fn erase_display_clears_below() {
        let mut vt = Vt::new(5, 3, 0, false);
        vt.input(b"aa\r\nbb\r\ncc\x1b[2;1H\x1b[J");
        assert_eq!(screen_text(&mut vt), vec!["aa", "", ""]);
    }

    #[test]
    fn cursor_visibility_toggles() {
        let mut vt = Vt::new(4, 1, 0, false);
        vt.input(b"\x1b[?25l");
        assert!(!vt.screen().cursor_visible());
        vt.input(b"\x1b[?25h");
        assert!(vt.screen().cursor_visible());
    }

    #[test]
    fn osc_gfx_requires_enable() {
        let payload = b"\x1b]image:file=/tmp/a.png\x07";
        let mut off = Vt::new(4, 1, 0, false);
        off.input(payload);
        assert!(off.take_gfx().is_empty());

        let mut on = Vt::new(4, 1, 0, true);
        on.input(payload);
        match on.take_gfx().as_slice() {
            [GfxCommand::Image(spec)] => {
                assert_eq!(spec.file.as_deref(), Some(std::path::Path::new("/tmp/a.png")));
            }
            other => panic!("unexpected gfx: {other:?}"),
        }
    }

    #[test]
    fn osc_options_survive_the_parsers_semicolon_split() {
        let mut vt = Vt::new(4, 1, 0, true);
        vt.input(b"\x1b]box:color=00ff00;size=8,4\x1b\\");
        match vt.take_gfx().as_slice() {
            [GfxCommand::DrawBox(spec)] => {
                assert_eq!(spec.color, 0x00FF00);
                assert_eq!(spec.size, Some((8, 4)));
            }
            other => panic!("unexpected gfx: {other:?}"),
        }
    }

    #[test]
    fn keysym_encoding() {
        let mut buf = Vec::new();
        encode_keysym(KeySym::Char('a'), &mut buf);
        encode_keysym(KeySym::Enter, &mut buf);
        encode_keysym(KeySym::Up, &mut buf);
        encode_keysym(KeySym::F(1), &mut buf);
        encode_keysym(KeySym::F(5), &mut buf);
        assert_eq!(buf, b"a\r\x1b[A\x1bOP\x1b[15~");
    }

    #[test]
    fn control_chars_pass_through_as_chars() {
        let mut buf = Vec::new();
        encode_keysym(KeySym::Char('\u{3}'), &mut buf);
        assert_eq!(buf, [3]);
    }
}
