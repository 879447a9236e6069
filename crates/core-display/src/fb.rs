//! Dumb-buffer framebuffer with lock-counted pixel mapping.
//!
//! The mapping exists only while the lock count is positive: the first
//! `lock()` mmaps the buffer, the matching last `unlock()` unmaps it and
//! flushes a full-surface dirty rectangle so drivers that care (UDL and
//! other transport-backed displays) pick up the writes.

use std::num::NonZeroUsize;
use std::os::fd::AsFd;
use std::ptr::NonNull;
use std::rc::Rc;

use anyhow::{Context, Result};
use drm::buffer::{Buffer, DrmFourcc};
use drm::control::{dumbbuffer::DumbBuffer, framebuffer, ClipRect, Device as ControlDevice};
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use tracing::{error, warn};

use crate::display::{Display, DisplayHandle};
use crate::edid::scaling_for_size;

/// One scanout buffer tied to the process display.
#[derive(Debug)]
pub struct Framebuffer {
    display: DisplayHandle,
    buffer: Option<DumbBuffer>,
    fb: framebuffer::Handle,
    width: u32,
    height: u32,
    pitch: u32,
    size: usize,
    scaling: u32,
    map_offset: u64,
    map: Option<NonNull<libc::c_void>>,
    lock_count: u32,
}

impl Framebuffer {
    /// Allocate a dumb buffer sized to the display's mode and register it as
    /// a framebuffer.
    pub fn new(display: DisplayHandle) -> Result<Self> {
        let (width, height) = display.resolution();
        let card = display.card();

        let buffer = card
            .create_dumb_buffer((width, height), DrmFourcc::Xrgb8888, 32)
            .context("CREATE_DUMB failed")?;
        let pitch = buffer.pitch();
        let size = pitch as usize * height as usize;

        let fb = match card.add_framebuffer(&buffer, 24, 32) {
            Ok(fb) => fb,
            Err(err) => {
                let _ = card.destroy_dumb_buffer(buffer);
                return Err(err).context("ADD_FB failed");
            }
        };

        let map_offset = match drm_ffi::mode::dumbbuffer::map(
            card.as_fd(),
            buffer.handle().into(),
            0,
            0,
        ) {
            Ok(map) => map.offset,
            Err(err) => {
                let _ = card.destroy_framebuffer(fb);
                let _ = card.destroy_dumb_buffer(buffer);
                return Err(err).context("MAP_DUMB failed");
            }
        };

        let (width_mm, _) = display.size_mm();
        let scaling = scaling_for_size(width, width_mm);

        Ok(Self {
            buffer: Some(buffer),
            fb,
            width,
            height,
            pitch,
            size,
            scaling,
            map_offset,
            map: None,
            lock_count: 0,
            display,
        })
    }

    /// Program this framebuffer onto the display.
    pub fn set_mode(&self) -> Result<()> {
        self.display.set_mode(self.fb)
    }

    /// Map the pixels (on the 0 -> 1 transition) and hand them out.
    ///
    /// Every successful `lock()` must be paired with exactly one `unlock()`
    /// before the next mode set.
    pub fn lock(&mut self) -> Option<&mut [u32]> {
        if self.lock_count == 0 && self.map.is_none() {
            let len = NonZeroUsize::new(self.size)?;
            let map = unsafe {
                mmap(
                    None,
                    len,
                    ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                    MapFlags::MAP_SHARED,
                    self.display.card().as_fd(),
                    self.map_offset as libc::off_t,
                )
            };
            match map {
                Ok(ptr) => self.map = Some(ptr),
                Err(err) => {
                    error!(target: "display.fb", %err, "mmap failed");
                    return None;
                }
            }
        }
        self.lock_count += 1;

        let ptr = self.map?;
        // Safe: the mapping is MAP_SHARED over `size` bytes and stays alive
        // until the matching unlock; the borrow ties it to `&mut self`.
        Some(unsafe {
            std::slice::from_raw_parts_mut(ptr.as_ptr().cast::<u32>(), self.size / 4)
        })
    }

    /// Drop one lock; on the 1 -> 0 transition unmap and flush the surface.
    pub fn unlock(&mut self) {
        if self.lock_count == 0 {
            error!(target: "display.fb", "framebuffer locking unbalanced");
            return;
        }
        self.lock_count -= 1;
        if self.lock_count > 0 {
            return;
        }

        if let Some(ptr) = self.map.take() {
            if let Err(err) = unsafe { munmap(ptr, self.size) } {
                warn!(target: "display.fb", %err, "munmap failed");
            }
        }

        let clip = ClipRect::new(0, 0, self.width as u16, self.height as u16);
        if let Err(err) = self.display.card().dirty_framebuffer(self.fb, &[clip]) {
            // ENOSYS just means the driver has no damage hook.
            if err.raw_os_error() != Some(libc::ENOSYS) {
                error!(target: "display.fb", %err, "DIRTY_FB failed");
            }
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row stride in bytes.
    pub fn pitch(&self) -> u32 {
        self.pitch
    }

    /// Integer scale factor derived from the physical display size.
    pub fn scaling(&self) -> u32 {
        self.scaling
    }

    pub fn display(&self) -> &Rc<Display> {
        &self.display
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        if self.lock_count > 0 {
            error!(target: "display.fb", count = self.lock_count, "framebuffer dropped while locked");
            if let Some(ptr) = self.map.take() {
                let _ = unsafe { munmap(ptr, self.size) };
            }
        }
        // Defer the framebuffer removal past the next mode set so the screen
        // keeps showing the old contents instead of garbage; the dumb-buffer
        // handle can go now since the framebuffer keeps the memory alive.
        self.display.schedule_rmfb(self.fb);
        if let Some(buffer) = self.buffer.take() {
            let _ = self.display.card().destroy_dumb_buffer(buffer);
        }
    }
}
