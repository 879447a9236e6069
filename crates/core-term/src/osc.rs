//! The graphics OSC extension: `image:` and `box:` commands.
//!
//! Payload grammar is a command prefix followed by `key=value` options
//! separated by semicolons, e.g.
//! `image:file=/usr/share/splash.png;location=10,20;scale=2`. Parse errors
//! and non-ASCII payloads drop the whole sequence silently; a hostile or
//! garbled stream must not wedge the terminal.

use std::path::PathBuf;

/// Upper bound for an explicit `scale=` option.
pub const MAX_IMAGE_SCALE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GfxSpec {
    pub file: Option<PathBuf>,
    pub location: Option<(u32, u32)>,
    pub offset: Option<(i32, i32)>,
    /// 0 means "derive from the framebuffer scaling".
    pub scale: u32,
    pub color: u32,
    pub size: Option<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GfxCommand {
    Image(GfxSpec),
    DrawBox(GfxSpec),
}

fn parse_pair<T: std::str::FromStr>(v: &str) -> Option<(T, T)> {
    let (x, y) = v.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

fn parse_spec(options: &str) -> Option<GfxSpec> {
    let mut spec = GfxSpec::default();
    for opt in options.split(';') {
        if opt.is_empty() {
            continue;
        }
        let (key, value) = opt.split_once('=')?;
        match key {
            "file" => spec.file = Some(PathBuf::from(value)),
            "location" => spec.location = Some(parse_pair(value)?),
            "offset" => spec.offset = Some(parse_pair(value)?),
            "scale" => spec.scale = value.parse::<u32>().ok()?.min(MAX_IMAGE_SCALE),
            "color" => spec.color = u32::from_str_radix(value, 16).ok()?,
            "size" => spec.size = Some(parse_pair(value)?),
            _ => return None,
        }
    }
    Some(spec)
}

/// Parse one OSC payload. Returns `None` for anything that is not a
/// well-formed graphics command.
pub fn parse_gfx(osc: &[u8]) -> Option<GfxCommand> {
    if !osc.is_ascii() {
        return None;
    }
    let osc = std::str::from_utf8(osc).ok()?;

    if let Some(options) = osc.strip_prefix("image:") {
        let spec = parse_spec(options)?;
        spec.file.is_some().then(|| GfxCommand::Image(spec))
    } else if let Some(options) = osc.strip_prefix("box:") {
        let spec = parse_spec(options)?;
        spec.size.is_some().then(|| GfxCommand::DrawBox(spec))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn image_with_all_options() {
        let cmd = parse_gfx(b"image:file=/tmp/a.png;location=10,20;offset=-3,4;scale=2").unwrap();
        let GfxCommand::Image(spec) = cmd else {
            panic!("expected image");
        };
        assert_eq!(spec.file.as_deref(), Some(std::path::Path::new("/tmp/a.png")));
        assert_eq!(spec.location, Some((10, 20)));
        assert_eq!(spec.offset, Some((-3, 4)));
        assert_eq!(spec.scale, 2);
    }

    #[test]
    fn image_requires_a_file() {
        assert_eq!(parse_gfx(b"image:location=1,2"), None);
    }

    #[test]
    fn box_with_color_and_size() {
        let cmd = parse_gfx(b"box:color=ff8000;size=64,32;location=0,0").unwrap();
        let GfxCommand::DrawBox(spec) = cmd else {
            panic!("expected box");
        };
        assert_eq!(spec.color, 0xFF8000);
        assert_eq!(spec.size, Some((64, 32)));
    }

    #[test]
    fn scale_zero_means_auto_and_huge_scales_clamp() {
        let GfxCommand::Image(auto) = parse_gfx(b"image:file=/a;scale=0").unwrap() else {
            panic!();
        };
        assert_eq!(auto.scale, 0);
        let GfxCommand::Image(clamped) = parse_gfx(b"image:file=/a;scale=5000").unwrap() else {
            panic!();
        };
        assert_eq!(clamped.scale, MAX_IMAGE_SCALE);
    }

    #[test]
    fn junk_is_rejected() {
        assert_eq!(parse_gfx(b"image:file=/a;nonsense"), None);
        assert_eq!(parse_gfx(b"image:wat=1"), None);
        assert_eq!(parse_gfx(b"0;window title"), None);
        assert_eq!(parse_gfx("image:file=/tmp/\u{00e9}.png".as_bytes()), None);
        assert_eq!(parse_gfx(b"box:color=zz;size=1,1"), None);
    }
}
