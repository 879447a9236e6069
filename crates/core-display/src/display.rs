//! DRM device scanning, selection and mode setting.
//!
//! `scan()` walks the card minors, takes master on each candidate, scores the
//! main connector it would drive and keeps the best one. The winner holds
//! master until it is explicitly dropped for the compositor. `rescan()`
//! re-runs the scan on hotplug and reports whether the chosen
//! device/connector/CRTC/driver changed (which forces every framebuffer to be
//! rebuilt).

use std::cell::{Cell, RefCell};
use std::io;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use drm::control::{
    connector, crtc, framebuffer, plane, Device as ControlDevice, Mode, ModeTypeFlags, PlaneType,
    ResourceHandles,
};
use drm::Device;
use tracing::{debug, info, warn};

use crate::card::Card;
use crate::edid::{self, DetailedTiming, EDID_SIZE};
use crate::gamma::GammaRamp;

/// Highest DRM minor probed by `scan()`.
const DRM_MAX_MINOR: u32 = 16;

/// Delay before the single master-acquisition retry on a busy candidate.
const MASTER_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Shared handle to the process-wide display.
pub type DisplayHandle = Rc<Display>;

/// The selected display device: one open card, one connector, one CRTC, one
/// mode.
#[derive(Debug)]
pub struct Display {
    card: Card,
    minor: u32,
    driver: String,
    connector: connector::Handle,
    internal: bool,
    connector_mm: (u32, u32),
    crtc: crtc::Handle,
    mode: Mode,
    edid: RefCell<Option<[u8; EDID_SIZE]>>,
    delayed_rmfb: Cell<Option<framebuffer::Handle>>,
}

impl Display {
    /// Scan all minors and return the best-scoring display, with master held.
    ///
    /// `prefer_internal` selects the panel connectors (LVDS/eDP/DSI) first;
    /// the caller passes `false` when the lid is closed.
    pub fn scan(prefer_internal: bool) -> Option<DisplayHandle> {
        let mut best: Option<(i64, Display)> = None;

        for minor in 0..DRM_MAX_MINOR {
            let Some(candidate) = probe_minor(minor, prefer_internal) else {
                continue;
            };
            let score = candidate.score();
            // Strict comparison keeps the lower minor on ties.
            if best.as_ref().is_none_or(|(s, _)| score > *s) {
                best = Some((score, candidate));
            }
        }

        let (_, chosen) = best?;
        info!(
            target: "display",
            minor = chosen.minor,
            driver = chosen.driver.as_str(),
            internal = chosen.internal,
            width = chosen.mode.size().0,
            height = chosen.mode.size().1,
            "display selected"
        );
        Some(Rc::new(chosen))
    }

    fn score(&self) -> i64 {
        let mut score = 0;
        if self.internal {
            score += 1;
        }
        match self.driver.as_str() {
            // USB display-link style drivers lose to anything else.
            "udl" | "evdi" => score -= 1,
            // VGEM has no outputs at all.
            "vgem" => score -= 1_000_000,
            _ => {}
        }
        score
    }

    /// True when `other` drives the same device/connector/CRTC with the same
    /// driver, meaning existing framebuffers remain valid.
    pub fn same_target(&self, other: &Display) -> bool {
        self.minor == other.minor
            && self.connector == other.connector
            && self.crtc == other.crtc
            && self.driver == other.driver
    }

    pub fn set_master(&self) -> io::Result<()> {
        self.card.acquire_master_lock()
    }

    pub fn drop_master(&self) -> io::Result<()> {
        self.card.release_master_lock()
    }

    /// Program the CRTC with `fb` and the selected mode, hide the cursor,
    /// shut down every other CRTC and every non-primary plane, and release
    /// any framebuffer whose removal was deferred across this mode set.
    pub fn set_mode(&self, fb: framebuffer::Handle) -> Result<()> {
        if let Ok(res) = self.card.resource_handles() {
            for &other in res.crtcs() {
                if other != self.crtc {
                    let _ = self.card.set_crtc(other, None, (0, 0), &[], None);
                }
            }
        }

        self.card
            .set_crtc(self.crtc, Some(fb), (0, 0), &[self.connector], Some(self.mode))
            .context("unable to set CRTC")?;

        if let Err(err) = self
            .card
            .set_cursor::<drm::control::dumbbuffer::DumbBuffer>(self.crtc, None)
        {
            warn!(target: "display", %err, "unable to hide cursor");
        }

        self.disable_non_primary_planes();
        self.clear_pending_rmfb();
        Ok(())
    }

    fn disable_non_primary_planes(&self) {
        let Ok(planes) = self.card.plane_handles() else {
            return;
        };
        for &p in planes.iter() {
            let Ok(info) = self.card.get_plane(p) else {
                continue;
            };
            let Some(active_crtc) = info.crtc() else {
                continue;
            };
            let primary_on_ours =
                active_crtc == self.crtc && self.plane_type(p) == Some(PlaneType::Primary);
            if !primary_on_ours {
                if let Err(err) =
                    self.card
                        .set_plane(p, active_crtc, None, 0, (0, 0, 0, 0), (0, 0, 0, 0))
                {
                    warn!(target: "display", %err, "unable to disable plane");
                }
            }
        }
    }

    fn plane_type(&self, p: plane::Handle) -> Option<PlaneType> {
        let props = self.card.get_properties(p).ok()?;
        let (handles, values) = props.as_props_and_values();
        for (&ph, &val) in handles.iter().zip(values.iter()) {
            let Ok(info) = self.card.get_property(ph) else {
                continue;
            };
            if info.name().to_bytes() == b"type" {
                return match val {
                    v if v == PlaneType::Primary as u64 => Some(PlaneType::Primary),
                    v if v == PlaneType::Cursor as u64 => Some(PlaneType::Cursor),
                    _ => Some(PlaneType::Overlay),
                };
            }
        }
        None
    }

    /// Defer removal of `fb` until after the next mode set, so the old image
    /// keeps scanning out until the new one replaces it.
    pub fn schedule_rmfb(&self, fb: framebuffer::Handle) {
        self.clear_pending_rmfb();
        self.delayed_rmfb.set(Some(fb));
    }

    fn clear_pending_rmfb(&self) {
        if let Some(fb) = self.delayed_rmfb.take() {
            let _ = self.card.destroy_framebuffer(fb);
        }
    }

    /// The connector's EDID base block, fetched once and cached.
    pub fn edid(&self) -> Option<[u8; EDID_SIZE]> {
        if let Some(cached) = self.edid.borrow().as_ref() {
            return Some(*cached);
        }

        let props = self.card.get_properties(self.connector).ok()?;
        let (handles, values) = props.as_props_and_values();
        for (&ph, &val) in handles.iter().zip(values.iter()) {
            let Ok(info) = self.card.get_property(ph) else {
                continue;
            };
            if info.name().to_bytes() != b"EDID" {
                continue;
            }
            let Ok(blob) = self.card.get_property_blob(val) else {
                continue;
            };
            if blob.len() >= EDID_SIZE {
                let mut block = [0u8; EDID_SIZE];
                block.copy_from_slice(&blob[..EDID_SIZE]);
                *self.edid.borrow_mut() = Some(block);
                return Some(block);
            }
        }
        None
    }

    /// Physical panel width/height in millimeters: the EDID detailed timing
    /// matching the active mode when available, the connector's idea of its
    /// size otherwise.
    pub fn size_mm(&self) -> (u32, u32) {
        if let Some(edid) = self.edid() {
            for dtd in edid::detailed_timings(&edid) {
                if mode_matches_timing(&self.mode, &dtd) {
                    return (dtd.width_mm, dtd.height_mm);
                }
            }
        }
        self.connector_mm
    }

    pub fn resolution(&self) -> (u32, u32) {
        let (w, h) = self.mode.size();
        (u32::from(w), u32::from(h))
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_internal(&self) -> bool {
        self.internal
    }

    pub fn set_gamma(&self, ramp: &GammaRamp) -> Result<()> {
        self.card
            .set_gamma(self.crtc, &ramp.red, &ramp.green, &ramp.blue)
            .context("unable to program gamma ramp")
    }

    pub(crate) fn card(&self) -> &Card {
        &self.card
    }
}

impl Drop for Display {
    fn drop(&mut self) {
        debug!(target: "display", minor = self.minor, "destroying display");
        self.clear_pending_rmfb();
    }
}

fn mode_matches_timing(mode: &Mode, dtd: &DetailedTiming) -> bool {
    let (w, h) = mode.size();
    let (hs_start, hs_end, htotal) = mode.hsync();
    let (vs_start, vs_end, vtotal) = mode.vsync();
    mode.clock() == dtd.clock_khz
        && u32::from(w) == dtd.hdisplay
        && u32::from(h) == dtd.vdisplay
        && u32::from(hs_start) == dtd.hsync_start
        && u32::from(hs_end) == dtd.hsync_end
        && u32::from(htotal) == dtd.htotal
        && u32::from(vs_start) == dtd.vsync_start
        && u32::from(vs_end) == dtd.vsync_end
        && u32::from(vtotal) == dtd.vtotal
}

fn probe_minor(minor: u32, prefer_internal: bool) -> Option<Display> {
    let card = Card::open_minor(minor).ok()?;

    // If nobody else holds master this succeeds immediately; give a busy
    // peer one chance to let go.
    if card.acquire_master_lock().is_err() {
        thread::sleep(MASTER_RETRY_DELAY);
        if let Err(err) = card.acquire_master_lock() {
            debug!(target: "display.scan", minor, %err, "cannot become master");
            return None;
        }
    }

    let res = card.resource_handles().ok()?;
    if res.crtcs().is_empty() || res.connectors().is_empty() {
        // VGEM and friends.
        return None;
    }

    let (conn, mode) = find_main_connector(&card, &res, prefer_internal)?;
    let crtc = find_crtc_for_connector(&card, &res, &conn)?;
    let driver = card
        .get_driver()
        .map(|d| d.name().to_string_lossy().into_owned())
        .unwrap_or_default();

    Some(Display {
        minor,
        driver,
        internal: is_internal(conn.interface()),
        connector_mm: conn.size().unwrap_or((0, 0)),
        connector: conn.handle(),
        crtc,
        mode,
        card,
        edid: RefCell::new(None),
        delayed_rmfb: Cell::new(None),
    })
}

fn is_internal(interface: connector::Interface) -> bool {
    matches!(
        interface,
        connector::Interface::LVDS
            | connector::Interface::EmbeddedDisplayPort
            | connector::Interface::DSI
    )
}

fn first_connected(
    card: &Card,
    res: &ResourceHandles,
    want_internal: bool,
) -> Option<connector::Info> {
    for &handle in res.connectors() {
        let Ok(info) = card.get_connector(handle, false) else {
            continue;
        };
        if is_internal(info.interface()) != want_internal {
            continue;
        }
        if info.state() == connector::State::Connected && !info.modes().is_empty() {
            return Some(info);
        }
    }
    None
}

fn find_main_connector(
    card: &Card,
    res: &ResourceHandles,
    prefer_internal: bool,
) -> Option<(connector::Info, Mode)> {
    let conn = if prefer_internal {
        first_connected(card, res, true).or_else(|| first_connected(card, res, false))
    } else {
        first_connected(card, res, false)
    }?;

    let mode = conn
        .modes()
        .iter()
        .find(|m| m.mode_type().contains(ModeTypeFlags::PREFERRED))
        .or_else(|| conn.modes().first())
        .copied()?;

    Some((conn, mode))
}

/// Pick the CRTC for `conn`: the one its active encoder already drives, else
/// the reachable CRTC with the most compatible planes.
fn find_crtc_for_connector(
    card: &Card,
    res: &ResourceHandles,
    conn: &connector::Info,
) -> Option<crtc::Handle> {
    if let Some(enc) = conn.current_encoder() {
        if let Ok(info) = card.get_encoder(enc) {
            if let Some(crtc) = info.crtc() {
                return Some(crtc);
            }
        }
    }

    let mut best: Option<(usize, crtc::Handle)> = None;
    for &enc in conn.encoders() {
        let Ok(info) = card.get_encoder(enc) else {
            continue;
        };
        for crtc in res.filter_crtcs(info.possible_crtcs()) {
            let planes = planes_for_crtc(card, res, crtc);
            if best.is_none_or(|(n, _)| planes > n) {
                best = Some((planes, crtc));
            }
        }
    }
    best.map(|(_, crtc)| crtc)
}

fn planes_for_crtc(card: &Card, res: &ResourceHandles, crtc: crtc::Handle) -> usize {
    let Ok(planes) = card.plane_handles() else {
        return 0;
    };
    planes
        .iter()
        .filter(|&&p| {
            card.get_plane(p)
                .map(|info| res.filter_crtcs(info.possible_crtcs()).contains(&crtc))
                .unwrap_or(false)
        })
        .count()
}

/// Re-run the scan after a hotplug event. Returns true when the topology
/// changed and every framebuffer must be rebuilt against `current`.
pub fn rescan(current: &mut Option<DisplayHandle>, prefer_internal: bool) -> bool {
    // Drop master so the probe scan can take it.
    if let Some(cur) = current.as_ref() {
        let _ = cur.drop_master();
    }

    match Display::scan(prefer_internal) {
        Some(fresh) => {
            if current.as_ref().is_some_and(|cur| cur.same_target(&fresh)) {
                // Same topology; close the probe (releasing its master) and
                // take master back on the device we kept.
                drop(fresh);
                if let Some(cur) = current.as_ref() {
                    let _ = cur.set_master();
                }
                false
            } else {
                *current = Some(fresh);
                true
            }
        }
        None => {
            if current.take().is_some() {
                warn!(target: "display", "display went away, running headless");
                true
            } else {
                false
            }
        }
    }
}
