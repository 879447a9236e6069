//! EDID detailed-timing parsing.
//!
//! Only the pieces the framebuffer needs: the four detailed timing
//! descriptors of the base block, matched against the active mode to learn
//! the physical size of the panel behind it. Byte layout per the EDID 1.x
//! base block.

/// Size of the base EDID block cached off the connector.
pub const EDID_SIZE: usize = 128;

const DTD_BASE: usize = 54;
const DTD_LEN: usize = 18;
const DTD_COUNT: usize = 4;

/// One decoded detailed timing descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetailedTiming {
    /// Pixel clock in kHz (the same unit KMS modes report).
    pub clock_khz: u32,
    pub hdisplay: u32,
    pub hsync_start: u32,
    pub hsync_end: u32,
    pub htotal: u32,
    pub vdisplay: u32,
    pub vsync_start: u32,
    pub vsync_end: u32,
    pub vtotal: u32,
    pub width_mm: u32,
    pub height_mm: u32,
}

fn parse_dtd(dtd: &[u8]) -> Option<DetailedTiming> {
    let clock = (u32::from(dtd[1]) << 8) | u32::from(dtd[0]);
    if clock == 0 {
        // Not a timing descriptor (monitor name, serial, ...).
        return None;
    }

    let hactive = ((u32::from(dtd[4]) & 0xf0) << 4) + u32::from(dtd[2]);
    let vactive = ((u32::from(dtd[7]) & 0xf0) << 4) + u32::from(dtd[5]);
    let hbl = ((u32::from(dtd[4]) & 0x0f) << 8) + u32::from(dtd[3]);
    let vbl = ((u32::from(dtd[7]) & 0x0f) << 8) + u32::from(dtd[6]);
    let hso = ((u32::from(dtd[11]) & 0xc0) << 2) + u32::from(dtd[8]);
    let vso = ((u32::from(dtd[11]) & 0x0c) << 2) + (u32::from(dtd[10]) >> 4);
    let hsw = ((u32::from(dtd[11]) & 0x30) << 4) + u32::from(dtd[9]);
    let vsw = ((u32::from(dtd[11]) & 0x03) << 4) + (u32::from(dtd[10]) & 0x0f);
    let hsize = ((u32::from(dtd[14]) & 0xf0) << 4) + u32::from(dtd[12]);
    let vsize = ((u32::from(dtd[14]) & 0x0f) << 8) + u32::from(dtd[13]);

    Some(DetailedTiming {
        clock_khz: clock * 10,
        hdisplay: hactive,
        hsync_start: hactive + hso,
        hsync_end: hactive + hso + hsw,
        htotal: hactive + hbl,
        vdisplay: vactive,
        vsync_start: vactive + vso,
        vsync_end: vactive + vso + vsw,
        vtotal: vactive + vbl,
        width_mm: hsize,
        height_mm: vsize,
    })
}

/// Decode the detailed timing descriptors present in `edid`.
pub fn detailed_timings(edid: &[u8; EDID_SIZE]) -> Vec<DetailedTiming> {
    (0..DTD_COUNT)
        .filter_map(|i| {
            let at = DTD_BASE + i * DTD_LEN;
            parse_dtd(&edid[at..at + DTD_LEN])
        })
        .collect()
}

/// Integer scale factor for a mode `width_px` wide on a panel `width_mm`
/// wide. Thresholds are in dots per centimeter.
pub fn scaling_for_size(width_px: u32, width_mm: u32) -> u32 {
    if width_mm == 0 {
        return 1;
    }
    let dots_per_cm = width_px * 10 / width_mm;
    if dots_per_cm > 133 {
        4
    } else if dots_per_cm > 100 {
        3
    } else if dots_per_cm > 67 {
        2
    } else {
        1
    }
}
