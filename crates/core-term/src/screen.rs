//! The character grid: visible cells, scrollback, cursor and damage ages.
//!
//! Damage tracking works in generations. Every mutation stamps the touched
//! cells with the screen's current generation; `draw()` walks the visible
//! cells, reports each with its stamp, and then opens a new generation. A
//! caller that remembers the value `draw()` returned can skip any cell whose
//! stamp is not newer than it, which is what makes redraw incremental.
//!
//! Invariants:
//! * `scroll_top <= scroll_bot < rows`.
//! * `sb_origin <= scrollback.len()` (scrolling past the top is a no-op).
//! * The grid always holds exactly `cols * rows` cells.

use std::collections::VecDeque;

use bitflags::bitflags;

use crate::color::{DEFAULT_BG, DEFAULT_FG};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AttrFlags: u8 {
        const INVERSE = 1 << 0;
        const BOLD = 1 << 1;
    }
}

/// Resolved cell attributes; colors are 0xRRGGBB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attrs {
    pub fg: u32,
    pub bg: u32,
    pub flags: AttrFlags,
}

impl Default for Attrs {
    fn default() -> Self {
        Self {
            fg: DEFAULT_FG,
            bg: DEFAULT_BG,
            flags: AttrFlags::empty(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Cell {
    ch: char,
    attrs: Attrs,
    age: u64,
}

impl Cell {
    fn blank(attrs: Attrs, age: u64) -> Self {
        Self {
            ch: ' ',
            attrs,
            age,
        }
    }
}

/// One visible cell as reported by `Screen::draw`.
#[derive(Debug, Clone, Copy)]
pub struct DrawCell {
    pub col: usize,
    pub row: usize,
    /// `None` for blank cells (fill, no glyph lookup needed).
    pub ch: Option<char>,
    pub attrs: Attrs,
    pub age: u64,
}

#[derive(Debug)]
pub struct Screen {
    cols: usize,
    rows: usize,
    grid: Vec<Cell>,
    scrollback: VecDeque<Vec<Cell>>,
    max_scrollback: usize,
    sb_origin: usize,
    cursor_col: usize,
    cursor_row: usize,
    saved_cursor: (usize, usize),
    attrs: Attrs,
    /// Palette index behind `attrs.fg`, kept so bold can brighten it.
    fg_index: Option<u8>,
    scroll_top: usize,
    scroll_bot: usize,
    generation: u64,
    wrap_pending: bool,
    cursor_visible: bool,
    autowrap: bool,
    /// Where the cursor was painted by the previous draw.
    last_cursor: Option<(usize, usize)>,
}

impl Screen {
    pub fn new(cols: usize, rows: usize, max_scrollback: usize) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        let attrs = Attrs::default();
        Self {
            cols,
            rows,
            grid: vec![Cell::blank(attrs, 1); cols * rows],
            scrollback: VecDeque::new(),
            max_scrollback,
            sb_origin: 0,
            cursor_col: 0,
            cursor_row: 0,
            saved_cursor: (0, 0),
            attrs,
            fg_index: Some(7),
            scroll_top: 0,
            scroll_bot: rows - 1,
            generation: 1,
            wrap_pending: false,
            cursor_visible: true,
            autowrap: true,
            last_cursor: None,
        }
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cursor(&self) -> (usize, usize) {
        (self.cursor_col, self.cursor_row)
    }

    pub fn cursor_visible(&self) -> bool {
        self.cursor_visible
    }

    pub fn scrollback_origin(&self) -> usize {
        self.sb_origin
    }

    fn at(&mut self, col: usize, row: usize) -> &mut Cell {
        &mut self.grid[row * self.cols + col]
    }

    /// Resize the grid, preserving as much of the top-left content as fits.
    /// The whole surface is freshly stamped afterwards.
    pub fn resize(&mut self, cols: usize, rows: usize) {
        let cols = cols.max(1);
        let rows = rows.max(1);
        if cols == self.cols && rows == self.rows {
            return;
        }

        self.generation += 1;
        let mut grid = vec![Cell::blank(self.attrs, self.generation); cols * rows];
        for row in 0..rows.min(self.rows) {
            for col in 0..cols.min(self.cols) {
                let mut cell = self.grid[row * self.cols + col];
                cell.age = self.generation;
                grid[row * cols + col] = cell;
            }
        }
        self.grid = grid;
        self.cols = cols;
        self.rows = rows;
        self.scroll_top = 0;
        self.scroll_bot = rows - 1;
        self.cursor_col = self.cursor_col.min(cols - 1);
        self.cursor_row = self.cursor_row.min(rows - 1);
        self.saved_cursor = (0, 0);
        self.sb_origin = 0;
        self.wrap_pending = false;
    }

    /// Walk the visible cells (scrollback origin applied) and open a new
    /// generation. Returns the generation the reported stamps belong to.
    ///
    /// The cursor renders as inverse video; its cell (and the cell it just
    /// left) always report the current generation so movement repaints them
    /// even when their content is unchanged.
    pub fn draw(&mut self, mut cb: impl FnMut(DrawCell)) -> u64 {
        let cursor = (self.cursor_visible && self.sb_origin == 0)
            .then_some((self.cursor_col, self.cursor_row));
        for row in 0..self.rows {
            for col in 0..self.cols {
                let cell = self.visible_cell(col, row);
                let here = Some((col, row));
                let mut attrs = cell.attrs;
                let mut age = cell.age;
                if here == cursor {
                    attrs.flags.toggle(AttrFlags::INVERSE);
                }
                if here == cursor || here == self.last_cursor {
                    age = self.generation;
                }
                cb(DrawCell {
                    col,
                    row,
                    ch: if cell.ch == ' ' { None } else { Some(cell.ch) },
                    attrs,
                    age,
                });
            }
        }
        self.last_cursor = cursor;
        let done = self.generation;
        self.generation += 1;
        done
    }

    fn visible_cell(&self, col: usize, row: usize) -> Cell {
        if row < self.sb_origin {
            let line = &self.scrollback[self.scrollback.len() - self.sb_origin + row];
            return line.get(col).copied().unwrap_or(Cell::blank(
                Attrs::default(),
                self.generation,
            ));
        }
        self.grid[(row - self.sb_origin) * self.cols + col]
    }

    /// Stamp every visible cell so the next draw repaints the full surface.
    fn touch_all(&mut self) {
        let generation = self.generation;
        for cell in &mut self.grid {
            cell.age = generation;
        }
        for line in &mut self.scrollback {
            for cell in line {
                cell.age = generation;
            }
        }
    }

    // ---- scrollback ---------------------------------------------------

    pub fn sb_up(&mut self, lines: usize) {
        let target = (self.sb_origin + lines).min(self.scrollback.len());
        if target != self.sb_origin {
            self.sb_origin = target;
            self.touch_all();
        }
    }

    pub fn sb_down(&mut self, lines: usize) {
        let target = self.sb_origin.saturating_sub(lines);
        if target != self.sb_origin {
            self.sb_origin = target;
            self.touch_all();
        }
    }

    pub fn sb_page_up(&mut self) {
        self.sb_up(self.rows);
    }

    pub fn sb_page_down(&mut self) {
        self.sb_down(self.rows);
    }

    pub fn sb_reset(&mut self) {
        if self.sb_origin != 0 {
            self.sb_origin = 0;
            self.touch_all();
        }
    }

    // ---- cursor and writing -------------------------------------------

    pub fn put_char(&mut self, ch: char) {
        if self.wrap_pending {
            if self.autowrap {
                self.carriage_return();
                self.line_feed();
            }
            self.wrap_pending = false;
        }
        let generation = self.generation;
        let attrs = self.attrs;
        let (col, row) = (self.cursor_col, self.cursor_row);
        *self.at(col, row) = Cell {
            ch,
            attrs,
            age: generation,
        };
        if self.cursor_col + 1 < self.cols {
            self.cursor_col += 1;
        } else {
            self.wrap_pending = true;
        }
    }

    pub fn carriage_return(&mut self) {
        self.cursor_col = 0;
        self.wrap_pending = false;
    }

    /// Move down one row, scrolling the region when the cursor sits on its
    /// bottom line.
    pub fn line_feed(&mut self) {
        if self.cursor_row == self.scroll_bot {
            self.scroll_up(1);
        } else if self.cursor_row + 1 < self.rows {
            self.cursor_row += 1;
        }
        self.wrap_pending = false;
    }

    /// Move up one row, scrolling the region down at its top line.
    pub fn reverse_index(&mut self) {
        if self.cursor_row == self.scroll_top {
            self.scroll_down(1);
        } else if self.cursor_row > 0 {
            self.cursor_row -= 1;
        }
        self.wrap_pending = false;
    }

    pub fn backspace(&mut self) {
        if self.cursor_col > 0 {
            self.cursor_col -= 1;
        }
        self.wrap_pending = false;
    }

    pub fn tab(&mut self) {
        let next = ((self.cursor_col / 8) + 1) * 8;
        self.cursor_col = next.min(self.cols - 1);
        self.wrap_pending = false;
    }

    pub fn move_cursor(&mut self, col: usize, row: usize) {
        self.cursor_col = col.min(self.cols - 1);
        self.cursor_row = row.min(self.rows - 1);
        self.wrap_pending = false;
    }

    pub fn move_rel(&mut self, dcol: isize, drow: isize) {
        let col = (self.cursor_col as isize + dcol).clamp(0, self.cols as isize - 1);
        let row = (self.cursor_row as isize + drow).clamp(0, self.rows as isize - 1);
        self.move_cursor(col as usize, row as usize);
    }

    pub fn save_cursor(&mut self) {
        self.saved_cursor = (self.cursor_col, self.cursor_row);
    }

    pub fn restore_cursor(&mut self) {
        let (col, row) = self.saved_cursor;
        self.move_cursor(col, row);
    }

    pub fn set_cursor_visible(&mut self, visible: bool) {
        self.cursor_visible = visible;
    }

    pub fn set_autowrap(&mut self, on: bool) {
        self.autowrap = on;
    }

    // ---- scrolling ----------------------------------------------------

    /// Scroll the region up; lines leaving a full-screen region enter the
    /// scrollback.
    pub fn scroll_up(&mut self, count: usize) {
        let full_screen = self.scroll_top == 0 && self.scroll_bot == self.rows - 1;
        for _ in 0..count.min(self.rows) {
            if full_screen && self.max_scrollback > 0 {
                let line: Vec<Cell> =
                    self.grid[0..self.cols].to_vec();
                if self.scrollback.len() == self.max_scrollback {
                    self.scrollback.pop_front();
                }
                self.scrollback.push_back(line);
            }
            let generation = self.generation;
            for row in self.scroll_top..self.scroll_bot {
                for col in 0..self.cols {
                    let mut below = self.grid[(row + 1) * self.cols + col];
                    below.age = generation;
                    self.grid[row * self.cols + col] = below;
                }
            }
            let attrs = self.attrs;
            for col in 0..self.cols {
                let bot = self.scroll_bot;
                *self.at(col, bot) = Cell::blank(attrs, generation);
            }
        }
    }

    /// Scroll the region down (no scrollback interaction).
    pub fn scroll_down(&mut self, count: usize) {
        let generation = self.generation;
        for _ in 0..count.min(self.rows) {
            for row in (self.scroll_top..self.scroll_bot).rev() {
                for col in 0..self.cols {
                    let mut above = self.grid[row * self.cols + col];
                    above.age = generation;
                    self.grid[(row + 1) * self.cols + col] = above;
                }
            }
            let attrs = self.attrs;
            for col in 0..self.cols {
                let top = self.scroll_top;
                *self.at(col, top) = Cell::blank(attrs, generation);
            }
        }
    }

    /// Set the scroll region from 1-based inclusive bounds; out-of-order or
    /// out-of-range bounds reset it to the full screen.
    pub fn set_scroll_region(&mut self, top: usize, bot: usize) {
        if top >= 1 && top < bot && bot <= self.rows {
            self.scroll_top = top - 1;
            self.scroll_bot = bot - 1;
        } else {
            self.scroll_top = 0;
            self.scroll_bot = self.rows - 1;
        }
        self.move_cursor(0, 0);
    }

    pub fn insert_lines(&mut self, count: usize) {
        if self.cursor_row < self.scroll_top || self.cursor_row > self.scroll_bot {
            return;
        }
        let saved_top = self.scroll_top;
        self.scroll_top = self.cursor_row;
        self.scroll_down(count);
        self.scroll_top = saved_top;
    }

    pub fn delete_lines(&mut self, count: usize) {
        if self.cursor_row < self.scroll_top || self.cursor_row > self.scroll_bot {
            return;
        }
        let saved_top = self.scroll_top;
        self.scroll_top = self.cursor_row;
        self.scroll_up_no_scrollback(count);
        self.scroll_top = saved_top;
    }

    fn scroll_up_no_scrollback(&mut self, count: usize) {
        // Deleted lines never enter the scrollback.
        let saved_sb = self.max_scrollback;
        self.max_scrollback = 0;
        self.scroll_up(count);
        self.max_scrollback = saved_sb;
    }

    pub fn insert_chars(&mut self, count: usize) {
        let generation = self.generation;
        let row = self.cursor_row;
        let start = self.cursor_col;
        let count = count.min(self.cols - start);
        let base = row * self.cols;
        for col in (start..self.cols - count).rev() {
            let mut cell = self.grid[base + col];
            cell.age = generation;
            self.grid[base + col + count] = cell;
        }
        let attrs = self.attrs;
        for col in start..start + count {
            self.grid[base + col] = Cell::blank(attrs, generation);
        }
    }

    pub fn delete_chars(&mut self, count: usize) {
        let generation = self.generation;
        let row = self.cursor_row;
        let start = self.cursor_col;
        let count = count.min(self.cols - start);
        let base = row * self.cols;
        for col in start..self.cols - count {
            let mut cell = self.grid[base + col + count];
            cell.age = generation;
            self.grid[base + col] = cell;
        }
        let attrs = self.attrs;
        for col in self.cols - count..self.cols {
            self.grid[base + col] = Cell::blank(attrs, generation);
        }
    }

    pub fn erase_chars(&mut self, count: usize) {
        let generation = self.generation;
        let attrs = self.attrs;
        let row = self.cursor_row;
        let end = (self.cursor_col + count).min(self.cols);
        for col in self.cursor_col..end {
            *self.at(col, row) = Cell::blank(attrs, generation);
        }
    }

    // ---- erasing ------------------------------------------------------

    fn erase_span(&mut self, row: usize, from: usize, to: usize) {
        let generation = self.generation;
        let attrs = self.attrs;
        for col in from..to {
            *self.at(col, row) = Cell::blank(attrs, generation);
        }
    }

    pub fn erase_line(&mut self, mode: u16) {
        let (col, row) = (self.cursor_col, self.cursor_row);
        match mode {
            0 => self.erase_span(row, col, self.cols),
            1 => self.erase_span(row, 0, col + 1),
            2 => self.erase_span(row, 0, self.cols),
            _ => {}
        }
    }

    pub fn erase_display(&mut self, mode: u16) {
        let row = self.cursor_row;
        match mode {
            0 => {
                self.erase_line(0);
                for r in row + 1..self.rows {
                    self.erase_span(r, 0, self.cols);
                }
            }
            1 => {
                self.erase_line(1);
                for r in 0..row {
                    self.erase_span(r, 0, self.cols);
                }
            }
            2 => {
                for r in 0..self.rows {
                    self.erase_span(r, 0, self.cols);
                }
            }
            _ => {}
        }
    }

    /// Full reset: grid cleared, attributes, cursor and region back to
    /// defaults. Scrollback survives.
    pub fn reset(&mut self) {
        self.attrs = Attrs::default();
        self.fg_index = Some(7);
        self.scroll_top = 0;
        self.scroll_bot = self.rows - 1;
        self.cursor_visible = true;
        self.autowrap = true;
        self.erase_display(2);
        self.move_cursor(0, 0);
        self.sb_reset();
    }

    // ---- attributes ---------------------------------------------------

    pub fn attrs(&self) -> Attrs {
        self.attrs
    }

    pub fn set_fg_indexed(&mut self, idx: u8) {
        self.fg_index = Some(idx);
        self.attrs.fg = self.resolve_fg(idx);
    }

    pub fn set_fg_rgb(&mut self, color: u32) {
        self.fg_index = None;
        self.attrs.fg = color;
    }

    pub fn set_bg_indexed(&mut self, idx: u8) {
        self.attrs.bg = crate::color::indexed(idx);
    }

    pub fn set_bg_rgb(&mut self, color: u32) {
        self.attrs.bg = color;
    }

    pub fn set_default_fg(&mut self) {
        self.fg_index = Some(7);
        self.attrs.fg = self.resolve_fg(7);
    }

    pub fn set_default_bg(&mut self) {
        self.attrs.bg = DEFAULT_BG;
    }

    pub fn set_bold(&mut self, on: bool) {
        self.attrs.flags.set(AttrFlags::BOLD, on);
        if let Some(idx) = self.fg_index {
            self.attrs.fg = self.resolve_fg(idx);
        }
    }

    pub fn set_inverse(&mut self, on: bool) {
        self.attrs.flags.set(AttrFlags::INVERSE, on);
    }

    pub fn sgr_reset(&mut self) {
        self.attrs = Attrs::default();
        self.fg_index = Some(7);
    }

    /// Bold brightens the base palette the way classic consoles do.
    fn resolve_fg(&self, idx: u8) -> u32 {
        let idx = if self.attrs.flags.contains(AttrFlags::BOLD) && idx < 8 {
            idx + 8
        } else {
            idx
        };
        crate::color::indexed(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn text_row(screen: &mut Screen, row: usize) -> String {
        let mut out = vec![' '; screen.cols()];
        screen.draw(|cell| {
            if cell.row == row {
                out[cell.col] = cell.ch.unwrap_or(' ');
            }
        });
        out.into_iter().collect::<String>().trim_end().to_string()
    }

    fn type_line(screen: &mut Screen, s: &str) {
        for ch in s.chars() {
            screen.put_char(ch);
        }
        screen.carriage_return();
        screen.line_feed();
    }

    #[test]
    fn put_and_wrap() {
        let mut s = Screen::new(4, 2, 10);
        for ch in "abcdef".chars() {
            s.put_char(ch);
        }
        assert_eq!(text_row(&mut s, 0), "abcd");
        assert_eq!(text_row(&mut s, 1), "ef");
    }

    #[test]
    fn linefeed_at_bottom_scrolls_into_scrollback() {
        let mut s = Screen::new(10, 2, 10);
        type_line(&mut s, "one");
        type_line(&mut s, "two");
        assert_eq!(text_row(&mut s, 0), "two");
        s.sb_up(1);
        assert_eq!(s.scrollback_origin(), 1);
        assert_eq!(text_row(&mut s, 0), "one");
    }

    #[test]
    fn scrollback_top_is_a_no_op() {
        let mut s = Screen::new(10, 2, 10);
        type_line(&mut s, "one");
        s.sb_up(100);
        let at_top = s.scrollback_origin();
        s.sb_page_up();
        assert_eq!(s.scrollback_origin(), at_top);
        s.sb_down(usize::MAX);
        assert_eq!(s.scrollback_origin(), 0);
    }

    #[test]
    fn draw_generations_advance() {
        let mut s = Screen::new(2, 1, 0);
        s.put_char('x');
        let first = s.draw(|_| {});
        s.put_char('y');
        let mut ages = Vec::new();
        let second = s.draw(|c| ages.push((c.col, c.age)));
        assert!(second > first);
        // 'x' was written in the first generation, 'y' in the second.
        assert_eq!(ages, vec![(0, first), (1, second)]);
    }

    #[test]
    fn erase_line_modes() {
        let mut s = Screen::new(5, 1, 0);
        for ch in "abcde".chars() {
            s.put_char(ch);
        }
        s.move_cursor(2, 0);
        s.erase_line(0);
        assert_eq!(text_row(&mut s, 0), "ab");
        for ch in "xyz".chars() {
            s.put_char(ch);
        }
        s.move_cursor(3, 0);
        s.erase_line(1);
        assert_eq!(text_row(&mut s, 0), "    z");
    }

    #[test]
    fn scroll_region_contains_scrolling() {
        let mut s = Screen::new(3, 4, 10);
        type_line(&mut s, "a");
        type_line(&mut s, "b");
        type_line(&mut s, "c");
        for ch in "d".chars() {
            s.put_char(ch);
        }
        // Region rows 2..3 (1-based): scrolling inside must not touch row 0.
        s.set_scroll_region(2, 3);
        s.move_cursor(0, 2);
        s.line_feed();
        assert_eq!(text_row(&mut s, 0), "a");
        assert_eq!(text_row(&mut s, 1), "c");
        assert_eq!(text_row(&mut s, 2), "");
        // Nothing went to scrollback from the partial region.
        s.sb_up(100);
        assert_eq!(s.scrollback_origin(), 0);
    }

    #[test]
    fn insert_and_delete_chars() {
        let mut s = Screen::new(6, 1, 0);
        for ch in "abcdef".chars() {
            s.put_char(ch);
        }
        s.move_cursor(1, 0);
        s.insert_chars(2);
        assert_eq!(text_row(&mut s, 0), "a  bcd");
        s.move_cursor(1, 0);
        s.delete_chars(2);
        assert_eq!(text_row(&mut s, 0), "abcd");
    }

    #[test]
    fn resize_preserves_top_left_and_stamps() {
        let mut s = Screen::new(4, 2, 10);
        for ch in "hey".chars() {
            s.put_char(ch);
        }
        let before = s.draw(|_| {});
        s.resize(8, 4);
        let mut fresh = 0;
        let after = s.draw(|c| {
            if c.age > before {
                fresh += 1;
            }
        });
        assert!(after > before);
        assert_eq!(fresh, 8 * 4);
        assert_eq!(text_row(&mut s, 0), "hey");
    }

    #[test]
    fn bold_brightens_palette_fg() {
        let mut s = Screen::new(2, 1, 0);
        s.set_fg_indexed(1);
        let plain = s.attrs().fg;
        s.set_bold(true);
        let bold = s.attrs().fg;
        assert_ne!(plain, bold);
        s.set_bold(false);
        assert_eq!(s.attrs().fg, plain);
    }

    #[test]
    fn scrollback_is_bounded() {
        let mut s = Screen::new(4, 2, 3);
        for i in 0..10 {
            type_line(&mut s, &format!("{i}"));
        }
        s.sb_up(usize::MAX);
        assert_eq!(s.scrollback_origin(), 3);
    }
}
