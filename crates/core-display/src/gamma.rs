//! Gamma ramp files: 768 bytes, 256 per channel, widened to 16 bits.

use std::path::Path;

use anyhow::{bail, Context, Result};

const CHANNEL_LEN: usize = 256;
const RAMP_FILE_LEN: usize = 3 * CHANNEL_LEN;

/// A decoded gamma ramp ready to hand to the CRTC.
pub struct GammaRamp {
    pub red: [u16; CHANNEL_LEN],
    pub green: [u16; CHANNEL_LEN],
    pub blue: [u16; CHANNEL_LEN],
}

/// Load a gamma ramp file: exactly 256 red, 256 green then 256 blue bytes.
/// Each 8-bit entry is scaled by 257 so 0xFF maps to 0xFFFF.
pub fn load_gamma_ramp(path: &Path) -> Result<GammaRamp> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("unable to read gamma ramp {}", path.display()))?;
    if bytes.len() != RAMP_FILE_LEN {
        bail!(
            "gamma ramp {} must be exactly {RAMP_FILE_LEN} bytes, got {}",
            path.display(),
            bytes.len()
        );
    }

    let mut ramp = GammaRamp {
        red: [0; CHANNEL_LEN],
        green: [0; CHANNEL_LEN],
        blue: [0; CHANNEL_LEN],
    };
    for i in 0..CHANNEL_LEN {
        ramp.red[i] = u16::from(bytes[i]) * 257;
        ramp.green[i] = u16::from(bytes[CHANNEL_LEN + i]) * 257;
        ramp.blue[i] = u16::from(bytes[2 * CHANNEL_LEN + i]) * 257;
    }
    Ok(ramp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn widens_each_channel() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut data = Vec::with_capacity(RAMP_FILE_LEN);
        for ch in 0..3u16 {
            for i in 0..CHANNEL_LEN {
                data.push(((i as u16 + ch) & 0xff) as u8);
            }
        }
        file.write_all(&data).unwrap();

        let ramp = load_gamma_ramp(file.path()).unwrap();
        assert_eq!(ramp.red[0], 0);
        assert_eq!(ramp.red[255], 255 * 257);
        assert_eq!(ramp.green[0], 257);
        assert_eq!(ramp.blue[7], 9 * 257);
    }

    #[test]
    fn rejects_short_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 100]).unwrap();
        assert!(load_gamma_ramp(file.path()).is_err());
    }
}
