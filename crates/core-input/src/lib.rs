//! core-input: evdev keyboards, exclusive grabs and the hotkey layer.
//!
//! Devices are discovered through udev and held with an exclusive grab while
//! the console is in the foreground, so keystrokes never leak into whatever
//! the compositor left focused underneath. Hotplug arrives on the udev
//! monitor fd; everything else is ordinary readable-fd traffic on the main
//! loop.

pub mod hotkeys;
pub mod keys;

use std::fs::File;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use input_linux::sys as evdev;
use input_linux::EvdevHandle;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use hotkeys::{dispatch, Action, ModState, Mods};

/// One key event as read off a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub code: u16,
    /// 0 = up, 1 = down, 2 = repeat.
    pub value: i32,
}

#[derive(Debug, Error)]
enum ReadFailure {
    #[error("try again")]
    Retry,
    #[error("device gone")]
    Gone,
    #[error(transparent)]
    Fatal(#[from] std::io::Error),
}

struct Device {
    path: PathBuf,
    handle: EvdevHandle<File>,
}

pub struct Input {
    udev_monitor: udev::MonitorSocket,
    devices: Vec<Device>,
    grabbed: bool,
    mods: ModState,
}

impl Input {
    /// Enumerate the input subsystem and subscribe to hotplug events. The
    /// console starts in the foreground, so every device is grabbed.
    pub fn new() -> Result<Self> {
        let monitor = udev::MonitorBuilder::new()
            .context("udev monitor")?
            .match_subsystem("input")
            .context("udev monitor filter")?
            .listen()
            .context("udev monitor listen")?;

        let mut input = Self {
            udev_monitor: monitor,
            devices: Vec::new(),
            grabbed: true,
            mods: ModState::default(),
        };

        let mut enumerator = udev::Enumerator::new().context("udev enumerate")?;
        enumerator
            .match_subsystem("input")
            .context("udev enumerate filter")?;
        for device in enumerator.scan_devices().context("udev scan")? {
            if let Some(node) = device.devnode() {
                input.add_device(node);
            }
        }
        info!(target: "input", devices = input.devices.len(), "input initialized");
        Ok(input)
    }

    pub fn modifiers(&mut self) -> &mut ModState {
        &mut self.mods
    }

    fn add_device(&mut self, path: &Path) {
        if self.devices.iter().any(|d| d.path == path) {
            return;
        }
        // Non-blocking: the read loop drains until EAGAIN.
        let file = match std::fs::OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
        {
            Ok(f) => f,
            Err(err) => {
                debug!(target: "input", path = %path.display(), %err, "cannot open");
                return;
            }
        };
        let handle = EvdevHandle::new(file);

        // Probe with a grab/ungrab cycle; a device some other process holds
        // is not ours to use.
        match handle.grab(true) {
            Ok(()) => {
                if !self.grabbed {
                    let _ = handle.grab(false);
                }
            }
            Err(err) if err.raw_os_error() == Some(libc::EBUSY) => {
                warn!(target: "input", path = %path.display(), "grabbed by another process");
                return;
            }
            Err(err) => {
                debug!(target: "input", path = %path.display(), %err, "grab probe failed");
                return;
            }
        }

        debug!(target: "input", path = %path.display(), "device added");
        self.devices.push(Device {
            path: path.to_path_buf(),
            handle,
        });
    }

    fn remove_device(&mut self, path: &Path) {
        if let Some(at) = self.devices.iter().position(|d| d.path == path) {
            debug!(target: "input", path = %path.display(), "device removed");
            self.devices.swap_remove(at);
        }
    }

    /// Release the grabs when the compositor takes over.
    pub fn enter_background(&mut self) {
        if !self.grabbed {
            return;
        }
        self.grabbed = false;
        for dev in &self.devices {
            let _ = dev.handle.grab(false);
        }
    }

    /// Re-grab everything on return to the foreground.
    pub fn enter_foreground(&mut self) {
        if self.grabbed {
            return;
        }
        self.grabbed = true;
        for dev in &self.devices {
            if let Err(err) = dev.handle.grab(true) {
                warn!(target: "input", path = %dev.path.display(), %err, "re-grab failed");
            }
        }
    }

    /// All fds the main loop should wait on (devices plus the monitor).
    pub fn fds(&self) -> Vec<RawFd> {
        let mut fds: Vec<RawFd> = self.devices.iter().map(|d| d.handle.as_raw_fd()).collect();
        fds.push(self.udev_monitor.as_raw_fd());
        fds
    }

    pub fn monitor_fd(&self) -> RawFd {
        self.udev_monitor.as_raw_fd()
    }

    /// Process hotplug notifications.
    pub fn dispatch_udev(&mut self) {
        let events: Vec<(udev::EventType, Option<PathBuf>)> = self
            .udev_monitor
            .iter()
            .map(|ev| (ev.event_type(), ev.devnode().map(Path::to_path_buf)))
            .collect();
        for (event_type, node) in events {
            let Some(node) = node else { continue };
            match event_type {
                udev::EventType::Add => self.add_device(&node),
                udev::EventType::Remove => self.remove_device(&node),
                _ => {}
            }
        }
    }

    /// Drain key events from every readable device. `readable` answers
    /// whether a given fd was reported ready by the main loop's wait.
    pub fn read_events(&mut self, readable: impl Fn(RawFd) -> bool) -> Vec<KeyEvent> {
        let mut out = Vec::new();
        let mut dead = Vec::new();

        for dev in &self.devices {
            if !readable(dev.handle.as_raw_fd()) {
                continue;
            }
            loop {
                match read_one(&dev.handle) {
                    Ok(Some(ev)) => out.push(ev),
                    Ok(None) => {}
                    Err(ReadFailure::Retry) => break,
                    Err(ReadFailure::Gone) => {
                        dead.push(dev.path.clone());
                        break;
                    }
                    Err(ReadFailure::Fatal(err)) => {
                        warn!(target: "input", path = %dev.path.display(), %err, "read failed");
                        dead.push(dev.path.clone());
                        break;
                    }
                }
            }
        }

        for path in dead {
            self.remove_device(&path);
        }
        out
    }

    /// Scan for a lid switch; a closed lid demotes the internal panel during
    /// display selection.
    pub fn lid_closed(&self) -> bool {
        for dev in &self.devices {
            let mut switches = [0u8; (evdev::SW_MAX as usize + 8) / 8];
            let res = unsafe { eviocgsw(dev.handle.as_raw_fd(), &mut switches) };
            if res.is_err() {
                continue;
            }
            let lid = evdev::SW_LID as usize;
            if switches[lid / 8] & (1 << (lid % 8)) != 0 {
                return true;
            }
        }
        false
    }
}

nix::ioctl_read_buf!(eviocgsw, b'E', 0x1b, u8);

fn read_one(handle: &EvdevHandle<File>) -> std::result::Result<Option<KeyEvent>, ReadFailure> {
    let mut events = [input_linux::sys::input_event {
        time: input_linux::sys::timeval {
            tv_sec: 0,
            tv_usec: 0,
        },
        type_: 0,
        code: 0,
        value: 0,
    }; 1];

    match handle.read(&mut events) {
        Ok(0) => Err(ReadFailure::Retry),
        Ok(_) => {
            let ev = &events[0];
            if i32::from(ev.type_) == evdev::EV_KEY {
                Ok(Some(KeyEvent {
                    code: ev.code,
                    value: ev.value,
                }))
            } else {
                Ok(None)
            }
        }
        Err(err) => match err.raw_os_error() {
            Some(libc::EAGAIN) | Some(libc::EINTR) => Err(ReadFailure::Retry),
            Some(libc::ENODEV) => Err(ReadFailure::Gone),
            _ => Err(ReadFailure::Fatal(err)),
        },
    }
}
