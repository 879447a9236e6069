//! One terminal: a PTY child, the emulator state and the framebuffer it
//! paints into.

use anyhow::{Context, Result};
use core_display::{DisplayHandle, Framebuffer};
use core_glyph::Renderer;
use tracing::{debug, warn};

use crate::color::luminance;
use crate::image::{Image, Placement};
use crate::osc::GfxCommand;
use crate::pty::Pty;
use crate::screen::{AttrFlags, Attrs};
use crate::vt::{KeySym, Vt};

/// Rows kept beyond the visible screen.
pub const SCROLLBACK_SIZE: usize = 200;

/// Interactive terminals get a login prompt; the splash and RPC-created
/// terminals get a plain sink so OSC streams can be piped at them.
const INTERACTIVE_ARGV: &[&str] = &["/sbin/agetty", "-", "9600", "xterm"];
const NONINTERACTIVE_ARGV: &[&str] = &["/bin/cat"];

/// What a new terminal needs from the process environment.
#[derive(Debug, Clone, Default)]
pub struct TermOptions {
    pub display: Option<DisplayHandle>,
    pub enable_gfx: bool,
}

#[derive(Debug)]
pub struct Terminal {
    vt: Vt,
    fb: Option<Framebuffer>,
    renderer: Renderer,
    pty: Pty,
    interactive: bool,
    active: bool,
    background: Option<u32>,
    /// Newest screen generation already painted; 0 forces a full repaint.
    age: u64,
}

/// Foreground/background for one cell, after the solid-background override
/// and inverse video are applied.
fn resolve_colors(attrs: &Attrs, background: Option<u32>) -> (u32, u32) {
    let (mut fg, mut bg) = match background {
        Some(over) => {
            // On a light background the default palette is unreadable; fall
            // back to black ink there.
            if luminance(over) > 128 {
                (0, over)
            } else {
                (attrs.fg, over)
            }
        }
        None => (attrs.fg, attrs.bg),
    };
    if attrs.flags.contains(AttrFlags::INVERSE) {
        std::mem::swap(&mut fg, &mut bg);
    }
    (fg, bg)
}

impl Terminal {
    pub fn new(interactive: bool, opts: &TermOptions) -> Result<Self> {
        let fb = match &opts.display {
            Some(display) => Some(Framebuffer::new(display.clone())?),
            None => None,
        };
        let renderer = Renderer::new(fb.as_ref().map_or(1, Framebuffer::scaling));
        let (cols, rows) = grid_size(fb.as_ref(), &renderer);

        let argv = if interactive {
            INTERACTIVE_ARGV
        } else {
            NONINTERACTIVE_ARGV
        };
        let pty = Pty::spawn(argv, cols as u16, rows as u16)
            .context("terminal child failed to start")?;
        let vt = Vt::new(cols, rows, SCROLLBACK_SIZE, opts.enable_gfx);

        debug!(
            target: "term",
            interactive,
            cols,
            rows,
            child = pty.child().as_raw(),
            "terminal created"
        );
        Ok(Self {
            vt,
            fb,
            renderer,
            pty,
            interactive,
            active: false,
            background: None,
            age: 0,
        })
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Make this terminal the one on screen: mode-set its framebuffer and
    /// repaint from scratch. The caller is responsible for holding DRM
    /// master and for updating the current-terminal index.
    pub fn activate(&mut self) -> Result<()> {
        self.active = true;
        if let Some(fb) = &self.fb {
            fb.set_mode()?;
        }
        self.age = 0;
        self.redraw();
        Ok(())
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    pub fn set_background(&mut self, color: u32) {
        self.background = Some(color);
        self.age = 0;
    }

    /// Paint cells whose generation is newer than the last repaint.
    pub fn redraw(&mut self) {
        let Self {
            vt,
            fb,
            renderer,
            background,
            age,
            ..
        } = self;
        let Some(fb) = fb.as_mut() else {
            // Headless: keep the emulator running, draw nowhere.
            *age = vt.screen_mut().draw(|_| {});
            return;
        };

        let pitch = fb.pitch() as usize;
        let last = *age;
        let background = *background;
        let renderer = *renderer;
        if let Some(pixels) = fb.lock() {
            *age = vt.screen_mut().draw(|cell| {
                if last != 0 && cell.age <= last {
                    return;
                }
                let (fg, bg) = resolve_colors(&cell.attrs, background);
                match cell.ch {
                    Some(ch) => {
                        renderer.render(pixels, pitch, cell.col, cell.row, ch as u32, fg, bg)
                    }
                    None => renderer.fill(pixels, pitch, cell.col, cell.row, bg),
                }
            });
            fb.unlock();
        }
    }

    /// The fd the main loop waits on for PTY output.
    pub fn bridge_fd(&self) -> std::os::fd::RawFd {
        self.pty.bridge_fd()
    }

    /// Drain the PTY, feed the emulator, run any decoded graphics commands
    /// and repaint.
    pub fn dispatch_io(&mut self) {
        let mut data = Vec::new();
        self.pty.drain(|bytes| data.extend_from_slice(bytes));
        if data.is_empty() {
            return;
        }
        self.vt.input(&data);
        for cmd in self.vt.take_gfx() {
            self.run_gfx(cmd);
        }
        self.redraw();
    }

    fn run_gfx(&mut self, cmd: GfxCommand) {
        let image = match &cmd {
            GfxCommand::Image(spec) => {
                let Some(path) = spec.file.as_deref() else { return };
                match Image::load(path) {
                    Ok(mut image) => {
                        image.placement = Placement::from_spec(spec);
                        image
                    }
                    Err(err) => {
                        warn!(target: "term.image", %err, "image command dropped");
                        return;
                    }
                }
            }
            GfxCommand::DrawBox(spec) => {
                let Some((w, h)) = spec.size else { return };
                let mut image = Image::solid(spec.color, w, h);
                image.placement = Placement::from_spec(spec);
                image
            }
        };
        self.show_image(&image);
    }

    /// Composite `image` onto the framebuffer.
    pub fn show_image(&mut self, image: &Image) {
        let Some(fb) = self.fb.as_mut() else { return };
        let (w, h, pitch, scaling) = (fb.width(), fb.height(), fb.pitch(), fb.scaling());
        if let Some(pixels) = fb.lock() {
            image.blit(pixels, w, h, pitch, scaling);
            fb.unlock();
        }
    }

    /// Fill the whole framebuffer with one color (the splash clear).
    pub fn clear_surface(&mut self, color: u32) {
        let Some(fb) = self.fb.as_mut() else { return };
        if let Some(pixels) = fb.lock() {
            pixels.fill(color);
            fb.unlock();
        }
    }

    /// Feed one decoded key to the emulator and hand the encoded bytes to
    /// the child. Keyboard input snaps the view back to the live screen.
    pub fn key_event(&mut self, sym: KeySym) {
        let mut bytes = Vec::with_capacity(8);
        crate::vt::encode_keysym(sym, &mut bytes);
        self.pty.write_all(&bytes);
        self.vt.screen_mut().sb_reset();
        self.redraw();
    }

    pub fn page_up(&mut self) {
        self.vt.screen_mut().sb_page_up();
        self.redraw();
    }

    pub fn page_down(&mut self) {
        self.vt.screen_mut().sb_page_down();
        self.redraw();
    }

    pub fn line_up(&mut self) {
        self.vt.screen_mut().sb_up(1);
        self.redraw();
    }

    pub fn line_down(&mut self) {
        self.vt.screen_mut().sb_down(1);
        self.redraw();
    }

    pub fn child_exited(&self) -> bool {
        self.pty.child_exited()
    }

    pub fn pts_name(&self) -> Result<String> {
        self.pty.pts_name()
    }

    /// Stop the terminal's own cursor from blinking over the splash.
    pub fn hide_cursor(&mut self) {
        self.vt.input(b"\x1b[?25l");
    }

    /// Tear down and rebuild the framebuffer after the display changed.
    /// The emulator keeps its contents; the grid is resized to the new cell
    /// geometry and the next redraw repaints everything.
    pub fn rebuild_framebuffer(&mut self, display: Option<DisplayHandle>) -> Result<()> {
        self.fb = None;
        if let Some(display) = display {
            self.fb = Some(Framebuffer::new(display)?);
        }
        self.renderer = Renderer::new(self.fb.as_ref().map_or(1, Framebuffer::scaling));
        let (cols, rows) = grid_size(self.fb.as_ref(), &self.renderer);
        self.vt.screen_mut().resize(cols, rows);
        if let Err(err) = self.pty.resize(cols as u16, rows as u16) {
            warn!(target: "term", %err, "pty resize failed");
        }
        self.age = 0;
        Ok(())
    }

    pub fn vt_mut(&mut self) -> &mut Vt {
        &mut self.vt
    }

    pub fn vt(&self) -> &Vt {
        &self.vt
    }
}

fn grid_size(fb: Option<&Framebuffer>, renderer: &Renderer) -> (usize, usize) {
    match fb {
        Some(fb) => {
            let (cell_w, cell_h) = renderer.cell_size();
            (
                (fb.width() / cell_w).max(1) as usize,
                (fb.height() / cell_h).max(1) as usize,
            )
        }
        // Headless terminals still run a child; give it a plausible grid.
        None => (80, 24),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::PALETTE_BASE;
    use pretty_assertions::assert_eq;

    #[test]
    fn colors_follow_attrs_without_override() {
        let attrs = Attrs::default();
        assert_eq!(resolve_colors(&attrs, None), (PALETTE_BASE[7], PALETTE_BASE[0]));
    }

    #[test]
    fn light_background_forces_black_ink() {
        let attrs = Attrs::default();
        let (fg, bg) = resolve_colors(&attrs, Some(0xFFFFFF));
        assert_eq!((fg, bg), (0, 0xFFFFFF));
    }

    #[test]
    fn dark_background_keeps_attribute_ink() {
        let attrs = Attrs::default();
        let (fg, bg) = resolve_colors(&attrs, Some(0x202020));
        assert_eq!((fg, bg), (PALETTE_BASE[7], 0x202020));
    }

    #[test]
    fn inverse_swaps_after_override() {
        let mut attrs = Attrs::default();
        attrs.flags |= AttrFlags::INVERSE;
        let (fg, bg) = resolve_colors(&attrs, Some(0xFFFFFF));
        assert_eq!((fg, bg), (0xFFFFFF, 0));
    }

    #[test]
    fn headless_terminal_runs_and_draws_nowhere() {
        let opts = TermOptions::default();
        let mut term = Terminal::new(false, &opts).unwrap();
        assert!(!term.is_active());
        term.vt_mut().input(b"hello");
        term.redraw();
        assert!(term.pts_name().unwrap().starts_with("/dev/pts/"));
        // Redraw advanced the repaint age even without a framebuffer.
        assert!(term.age > 0);
    }

    #[test]
    fn rebuild_resets_the_repaint_age() {
        let opts = TermOptions::default();
        let mut term = Terminal::new(false, &opts).unwrap();
        term.redraw();
        assert!(term.age > 0);
        term.rebuild_framebuffer(None).unwrap();
        assert_eq!(term.age, 0);
    }

    #[test]
    fn key_event_resets_scrollback_origin() {
        let opts = TermOptions::default();
        let mut term = Terminal::new(false, &opts).unwrap();
        for _ in 0..40 {
            term.vt_mut().input(b"line\r\n");
        }
        term.page_up();
        assert!(term.vt().screen().scrollback_origin() > 0);
        term.key_event(KeySym::Char('x'));
        assert_eq!(term.vt().screen().scrollback_origin(), 0);
    }
}
