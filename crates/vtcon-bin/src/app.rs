//! The single-threaded core: one readiness loop owning every subsystem.
//!
//! All mutation of the display, the terminal table and the current-terminal
//! index happens here (bus method handlers included, since messages are
//! popped and answered in-loop). Dispatch order within one iteration is
//! fixed: bus, display hotplug, input hotplug, keys, terminal PTYs, then
//! housekeeping; a VT-switch RPC therefore lands before any queued key
//! events are routed.

use std::collections::HashSet;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};

use anyhow::{bail, Context, Result};
use core_bus::{valid_vt, Bus, BusEvent, ImageRequest};
use core_display::DisplayHandle;
use core_input::{Action, Input, KeyEvent};
use core_splash::SplashHost;
use core_term::{
    Image, Placement, TermOptions, Terminal, TerminalTable, MAX_STD_TERMINALS, MAX_TERMINALS,
    SPLASH_TERMINAL,
};
use nix::sys::select::{select, FdSet};
use nix::sys::time::{TimeVal, TimeValLike};
use tracing::{error, info, warn};

use crate::sys;

/// Outcome of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    Continue,
    /// The splash terminal's child died; the caller owns the teardown.
    SplashDied,
}

pub struct App {
    pub display: Option<DisplayHandle>,
    pub table: TerminalTable,
    pub input: Input,
    pub bus: Bus,
    drm_monitor: udev::MonitorSocket,
    enable_gfx: bool,
    vts_enabled: bool,
    no_login: bool,
    login_prompt_seen: bool,
    /// Set when the compositor owns the display; suppresses rescans that
    /// would steal master back.
    background: bool,
    pending_rescan: bool,
    /// Exit code once the loop should stop.
    pub exit: Option<i32>,
}

impl App {
    pub fn new(
        display: Option<DisplayHandle>,
        input: Input,
        bus: Bus,
        enable_gfx: bool,
        vts_enabled: bool,
        no_login: bool,
    ) -> Result<Self> {
        let drm_monitor = udev::MonitorBuilder::new()
            .context("udev display monitor")?
            .match_subsystem("drm")
            .context("udev display monitor filter")?
            .listen()
            .context("udev display monitor listen")?;

        Ok(Self {
            display,
            table: TerminalTable::new(),
            input,
            bus,
            drm_monitor,
            enable_gfx,
            vts_enabled,
            no_login,
            login_prompt_seen: false,
            background: false,
            pending_rescan: false,
            exit: None,
        })
    }

    pub fn term_options(&self) -> TermOptions {
        TermOptions {
            display: self.display.clone(),
            enable_gfx: self.enable_gfx,
        }
    }

    /// One main-loop iteration. `timeout_us` of 0 blocks until something is
    /// ready (the splash player passes 1 to only pick up pending traffic).
    pub fn run_iteration(&mut self, timeout_us: i64) -> LoopStatus {
        let mut fds: Vec<RawFd> = vec![
            self.bus.watch_fd(),
            self.drm_monitor.as_raw_fd(),
            self.input.monitor_fd(),
        ];
        fds.extend(self.input.fds());
        for index in 0..MAX_TERMINALS {
            if let Some(term) = self.table.get(index) {
                fds.push(term.bridge_fd());
            }
        }
        fds.sort_unstable();
        fds.dedup();

        let mut read_set = FdSet::new();
        let mut except_set = FdSet::new();
        for &fd in &fds {
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            read_set.insert(borrowed);
            except_set.insert(borrowed);
        }

        let mut timeout = TimeVal::microseconds(timeout_us);
        let waited = if timeout_us == 0 {
            select(None, &mut read_set, None, &mut except_set, None)
        } else {
            select(
                None,
                &mut read_set,
                None,
                &mut except_set,
                &mut timeout,
            )
        };
        match waited {
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => return LoopStatus::Continue,
            Err(err) => {
                error!(target: "loop", %err, "select failed");
                return LoopStatus::Continue;
            }
        }

        let ready: HashSet<RawFd> = fds
            .iter()
            .copied()
            .filter(|&fd| {
                let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
                read_set.contains(borrowed) || except_set.contains(borrowed)
            })
            .collect();

        // 1. Bus traffic first so VT-switch RPCs precede queued keys.
        if ready.contains(&self.bus.watch_fd()) {
            while let Some(event) = self.bus.poll() {
                self.handle_bus_event(event);
            }
        }

        // 2. Display topology changes.
        if ready.contains(&self.drm_monitor.as_raw_fd()) && self.drain_drm_monitor() {
            self.handle_display_hotplug();
        }

        // 3. Input device hotplug, then the keys themselves.
        if ready.contains(&self.input.monitor_fd()) {
            self.input.dispatch_udev();
        }
        let keys = self.input.read_events(|fd| ready.contains(&fd));
        for key in keys {
            self.handle_key(key);
        }

        // 4. Terminal output.
        for index in 0..MAX_TERMINALS {
            let Some(term) = self.table.get_mut(index) else {
                continue;
            };
            if ready.contains(&term.bridge_fd()) {
                term.dispatch_io();
            }
        }

        self.housekeeping()
    }

    /// Post-dispatch: replace a dead child under the current terminal, or
    /// report the splash child's death to the caller.
    fn housekeeping(&mut self) -> LoopStatus {
        if self.pending_rescan && !self.background {
            self.pending_rescan = false;
            self.handle_display_hotplug();
        }

        let current = self.table.current_index();
        let Some(term) = self.table.current_mut() else {
            return LoopStatus::Continue;
        };
        if !term.child_exited() {
            return LoopStatus::Continue;
        }
        if current == SPLASH_TERMINAL {
            return LoopStatus::SplashDied;
        }

        info!(target: "loop", slot = current, "terminal child exited, respawning");
        let was_active = term.is_active();
        let opts = self.term_options();
        match Terminal::new(true, &opts) {
            Ok(mut fresh) => {
                if was_active {
                    if let Err(err) = fresh.activate() {
                        warn!(target: "loop", %err, "activate failed");
                    }
                }
                self.table.set(current, Some(fresh));
            }
            Err(err) => {
                error!(target: "loop", %err, "terminal respawn failed");
                self.table.set(current, None);
            }
        }
        LoopStatus::Continue
    }

    fn drain_drm_monitor(&mut self) -> bool {
        let mut saw_event = false;
        for _ in self.drm_monitor.iter() {
            saw_event = true;
        }
        saw_event
    }

    fn handle_display_hotplug(&mut self) {
        if self.background {
            // The compositor holds master; probing would preempt it. Do the
            // rescan on the next return to the foreground.
            self.pending_rescan = true;
            return;
        }

        let prefer_internal = !self.input.lid_closed();
        if !core_display::rescan(&mut self.display, prefer_internal) {
            return;
        }
        info!(target: "loop", headless = self.display.is_none(), "display changed, rebuilding");

        let display = self.display.clone();
        for (slot, term) in self.table.iter_mut() {
            if let Err(err) = term.rebuild_framebuffer(display.clone()) {
                warn!(target: "loop", slot, %err, "framebuffer rebuild failed");
            }
        }
        if let Some(term) = self.table.current_mut() {
            if term.is_active() {
                if let Err(err) = term.activate() {
                    warn!(target: "loop", %err, "reactivate after hotplug failed");
                }
            }
        }
    }

    // ---- input --------------------------------------------------------

    fn handle_key(&mut self, key: KeyEvent) {
        let has_active = self.table.current().is_some_and(Terminal::is_active);
        let action = core_input::dispatch(self.input.modifiers(), has_active, key.code, key.value);
        match action {
            Action::Consumed => {}
            Action::Forward(sym) => {
                if has_active {
                    self.bus.report_user_activity();
                    if let Some(term) = self.table.current_mut() {
                        term.key_event(sym);
                    }
                }
            }
            Action::ScrollPageUp => self.with_current(Terminal::page_up),
            Action::ScrollPageDown => self.with_current(Terminal::page_down),
            Action::ScrollLineUp => self.with_current(Terminal::line_up),
            Action::ScrollLineDown => self.with_current(Terminal::line_down),
            Action::BrightnessUp => self.bus.brightness_up(),
            Action::BrightnessDown => self.bus.brightness_down(),
            Action::SwitchToBackground => self.to_background(),
            Action::SwitchVt(slot) => self.switch_to_slot(slot),
        }
    }

    fn with_current(&mut self, f: impl Fn(&mut Terminal)) {
        if let Some(term) = self.table.current_mut() {
            f(term);
        }
    }

    // ---- display ownership orchestration ------------------------------

    /// Ctrl+Alt+F1: back to the splash if it is still alive, otherwise hand
    /// the display to the compositor.
    fn to_background(&mut self) {
        if let Some(term) = self.table.current_mut() {
            term.deactivate();
        }
        if self.table.get(SPLASH_TERMINAL).is_some() {
            self.table.set_current(SPLASH_TERMINAL);
            if let Some(term) = self.table.current_mut() {
                if let Err(err) = term.activate() {
                    warn!(target: "loop", %err, "splash activate failed");
                }
            }
            return;
        }
        self.hand_display_to_compositor();
    }

    /// Release everything the compositor needs: grabs, master, scanout.
    pub fn hand_display_to_compositor(&mut self) {
        if let Some(term) = self.table.current_mut() {
            term.deactivate();
        }
        self.background = true;
        self.input.enter_background();
        if let Some(display) = &self.display {
            let _ = display.drop_master();
        }
        self.bus.take_display_ownership();
    }

    /// Switch to standard slot `slot` (0-based), creating its terminal on
    /// demand. Used by both the hotkeys and the SwitchVT RPC.
    fn switch_to_slot(&mut self, slot: usize) {
        debug_assert!(slot < MAX_STD_TERMINALS);

        if !self.bus.release_display_ownership() {
            // The compositor declined (or is gone); allow preemption and
            // take master anyway.
            sys::enable_master_relax();
        }
        self.background = false;
        self.input.enter_foreground();
        if let Some(display) = &self.display {
            if let Err(err) = display.set_master() {
                warn!(target: "loop", %err, "cannot become DRM master");
            }
        }

        if let Some(term) = self.table.current_mut() {
            term.deactivate();
        }
        let opts = self.term_options();
        match self.table.create_term(slot + 1, &opts) {
            Ok(index) => {
                self.table.set_current(index);
                if let Some(term) = self.table.current_mut() {
                    if let Err(err) = term.activate() {
                        warn!(target: "loop", slot, %err, "terminal activate failed");
                    }
                }
            }
            Err(err) => error!(target: "loop", slot, %err, "terminal create failed"),
        }
    }

    // ---- bus methods --------------------------------------------------

    fn handle_bus_event(&mut self, event: BusEvent) {
        match event {
            BusEvent::SwitchVt { vt, message } => {
                if vt == 0 {
                    self.hand_display_to_compositor();
                    self.bus.reply_ok(&message, None);
                } else if valid_vt(vt, MAX_STD_TERMINALS) {
                    self.switch_to_slot(vt as usize - 1);
                    self.bus.reply_ok(&message, None);
                } else {
                    warn!(target: "bus", vt, "SwitchVT out of range");
                    self.bus.reply_not_handled(&message);
                }
            }
            BusEvent::MakeVt { vt, message } => {
                if !valid_vt(vt, MAX_STD_TERMINALS) {
                    warn!(target: "bus", vt, "MakeVT out of range");
                    self.bus.reply_not_handled(&message);
                    return;
                }
                let opts = self.term_options();
                let pts = self
                    .table
                    .create_term(vt as usize, &opts)
                    .and_then(|index| {
                        self.table
                            .get(index)
                            .context("slot empty after create")?
                            .pts_name()
                    });
                match pts {
                    Ok(pts) => self.bus.reply_ok(&message, Some(&pts)),
                    Err(err) => {
                        error!(target: "bus", vt, %err, "MakeVT failed");
                        self.bus.reply_not_handled(&message);
                    }
                }
            }
            BusEvent::Terminate { message } => {
                info!(target: "bus", "terminate requested");
                self.bus.reply_ok(&message, None);
                self.exit = Some(0);
            }
            BusEvent::ShowImage { request, message } => match self.show_rpc_image(request) {
                Ok(()) => self.bus.reply_ok(&message, None),
                Err(err) => {
                    warn!(target: "bus", %err, "Image RPC failed");
                    self.bus.reply_not_handled(&message);
                }
            },
            BusEvent::LoginPromptVisible => self.on_login_prompt(),
        }
    }

    fn show_rpc_image(&mut self, request: Option<ImageRequest>) -> Result<()> {
        let Some(request) = request else {
            bail!("bad image options");
        };
        let Some(path) = request.image.as_deref() else {
            bail!("no image given");
        };
        let mut image = Image::load(path)?;
        image.placement = Placement {
            location: request.location,
            offset: request.offset,
            scale: 0,
        };
        let Some(term) = self.table.current_mut() else {
            bail!("no current terminal");
        };
        term.show_image(&image);
        Ok(())
    }

    /// The compositor's login prompt is up. Acts once: without VT support
    /// the process is done; with it, only the splash goes away.
    fn on_login_prompt(&mut self) {
        if self.login_prompt_seen || self.no_login {
            return;
        }
        self.login_prompt_seen = true;
        info!(target: "bus", vts = self.vts_enabled, "login prompt visible");

        if !self.vts_enabled {
            self.exit = Some(0);
            return;
        }
        self.table.set(SPLASH_TERMINAL, None);
        if self.table.current_index() == SPLASH_TERMINAL {
            self.table.set_current(0);
        }
    }
}

/// The splash player's view of the app: paint on the splash terminal and
/// keep the world turning between frames.
pub struct SplashScreenHost<'a> {
    pub app: &'a mut App,
}

impl SplashHost for SplashScreenHost<'_> {
    fn show_image(&mut self, image: &Image) -> Result<()> {
        let Some(term) = self.app.table.get_mut(SPLASH_TERMINAL) else {
            bail!("splash terminal gone");
        };
        term.show_image(image);
        Ok(())
    }

    fn pump(&mut self) -> Result<()> {
        match self.app.run_iteration(1) {
            LoopStatus::SplashDied => bail!("splash child exited"),
            LoopStatus::Continue if self.app.exit.is_some() => bail!("shutdown during splash"),
            LoopStatus::Continue => Ok(()),
        }
    }
}
