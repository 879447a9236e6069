//! Command-line configuration.
//!
//! Everything tunable arrives here; there is no configuration file. The
//! splash frame flags are order-sensitive (`--image` occurrences interleave
//! with positional paths), so the derive struct is paired with
//! `ArgMatches::indices_of` to rebuild the original ordering.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, FromArgMatches, Parser};
use core_splash::{SplashConfig, DEFAULT_FRAME_INTERVAL};

#[derive(Parser, Debug)]
#[command(name = "vtcon", about = "KMS console agent", version)]
pub struct Args {
    /// Splash background color, 0xRRGGBB.
    #[arg(long, value_name = "COLOR")]
    pub clear: Option<String>,
    /// Detach and log to the kernel message buffer.
    #[arg(long)]
    pub daemon: bool,
    /// Keep running past the login prompt with VT switching available.
    #[arg(long)]
    pub dev_mode: bool,
    #[arg(long)]
    pub enable_vts: bool,
    /// Exit once the splash sequence finishes.
    #[arg(long)]
    pub splash_only: bool,
    /// Allow image/box escape sequences inside terminals.
    #[arg(long)]
    pub enable_gfx: bool,
    /// Do not treat the login prompt as a reason to tear the splash down.
    #[arg(long)]
    pub no_login: bool,
    /// Default per-frame duration in milliseconds.
    #[arg(long, value_name = "MS")]
    pub frame_interval: Option<u64>,
    #[arg(long, value_name = "N")]
    pub loop_count: Option<i32>,
    #[arg(long, value_name = "INDEX")]
    pub loop_start: Option<i32>,
    #[arg(long, value_name = "MS")]
    pub loop_interval: Option<u64>,
    #[arg(long, value_name = "X,Y")]
    pub loop_offset: Option<String>,
    /// Default offset for subsequent images.
    #[arg(long, value_name = "X,Y")]
    pub offset: Option<String>,
    /// Splash frame; may repeat.
    #[arg(long = "image", value_name = "PATH")]
    pub image: Vec<PathBuf>,
    /// Splash frame used instead of --image on displays wider than 1920 px.
    #[arg(long = "image-hires", value_name = "PATH")]
    pub image_hires: Vec<PathBuf>,
    /// Print "W H" for the chosen display and exit.
    #[arg(long)]
    pub print_resolution: bool,
    /// 768-byte gamma ramp file.
    #[arg(long, value_name = "PATH")]
    pub gamma: Option<PathBuf>,
    /// Additional splash frames.
    #[arg(value_name = "IMAGE")]
    pub extra_images: Vec<PathBuf>,
}

/// Fully parsed configuration.
#[derive(Debug)]
pub struct Config {
    pub args: Args,
    pub splash: SplashConfig,
    /// Standard splash frames in command-line order.
    pub frames: Vec<PathBuf>,
    pub frames_hires: Vec<PathBuf>,
}

impl Config {
    pub fn vts_enabled(&self) -> bool {
        self.args.dev_mode || self.args.enable_vts
    }

    /// The frame list for a display of the given width.
    pub fn frames_for_width(&self, width: u32) -> &[PathBuf] {
        if width > 1920 && !self.frames_hires.is_empty() {
            &self.frames_hires
        } else {
            &self.frames
        }
    }
}

/// Parse like `strtoul(s, 0, 0)`: `0x` hex, leading `0` octal, else decimal.
pub fn parse_u32_auto(s: &str) -> Result<u32> {
    let s = s.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else if s.len() > 1 && s.starts_with('0') {
        u32::from_str_radix(&s[1..], 8)
    } else {
        s.parse()
    };
    parsed.with_context(|| format!("bad numeric value {s:?}"))
}

/// Parse an `x,y` pair.
pub fn parse_offset(s: &str) -> Result<(i32, i32)> {
    let Some((x, y)) = s.split_once(',') else {
        bail!("bad offset {s:?}, expected X,Y");
    };
    Ok((
        x.trim().parse().with_context(|| format!("bad offset {s:?}"))?,
        y.trim().parse().with_context(|| format!("bad offset {s:?}"))?,
    ))
}

pub fn parse() -> Result<Config> {
    from_argv(std::env::args_os())
}

pub fn from_argv<I, T>(argv: I) -> Result<Config>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = Args::command()
        .get_matches_from(argv);
    let args = Args::from_arg_matches(&matches).context("bad command line")?;

    let splash = SplashConfig {
        clear: match &args.clear {
            Some(s) => parse_u32_auto(s)?,
            None => 0x000000,
        },
        default_duration: args
            .frame_interval
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_FRAME_INTERVAL),
        loop_start: args.loop_start.and_then(|s| usize::try_from(s).ok()),
        loop_count: args.loop_count.unwrap_or(-1),
        loop_duration: args.loop_interval.map(Duration::from_millis),
        loop_offset: args.loop_offset.as_deref().map(parse_offset).transpose()?,
        offset: args.offset.as_deref().map(parse_offset).transpose()?,
    };

    // Rebuild the command-line ordering of `--image` and positional frames.
    let mut ordered: Vec<(usize, PathBuf)> = Vec::new();
    for (name, values) in [("image", &args.image), ("extra_images", &args.extra_images)] {
        if let Some(indices) = matches.indices_of(name) {
            for (index, path) in indices.zip(values.iter()) {
                ordered.push((index, path.clone()));
            }
        }
    }
    ordered.sort_by_key(|&(index, _)| index);

    Ok(Config {
        frames: ordered.into_iter().map(|(_, p)| p).collect(),
        frames_hires: args.image_hires.clone(),
        splash,
        args,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cfg(line: &[&str]) -> Config {
        from_argv(std::iter::once("vtcon").chain(line.iter().copied())).unwrap()
    }

    #[test]
    fn numeric_parsing_matches_strtoul() {
        assert_eq!(parse_u32_auto("0x00FF00").unwrap(), 0x00FF00);
        assert_eq!(parse_u32_auto("255").unwrap(), 255);
        assert_eq!(parse_u32_auto("010").unwrap(), 8);
        assert!(parse_u32_auto("wat").is_err());
    }

    #[test]
    fn offsets_parse_signed_pairs() {
        assert_eq!(parse_offset("3,-4").unwrap(), (3, -4));
        assert!(parse_offset("3").is_err());
        assert!(parse_offset("a,b").is_err());
    }

    #[test]
    fn scenario_flags_build_a_loop_config() {
        let c = cfg(&[
            "--clear",
            "0x000000",
            "--frame-interval",
            "50",
            "--loop-start",
            "2",
            "--loop-count",
            "3",
            "--loop-interval",
            "100",
            "a.png",
            "b.png",
            "c.png",
            "d.png",
        ]);
        assert_eq!(c.splash.clear, 0);
        assert_eq!(c.splash.default_duration, Duration::from_millis(50));
        assert_eq!(c.splash.loop_start, Some(2));
        assert_eq!(c.splash.loop_count, 3);
        assert_eq!(c.splash.loop_duration, Some(Duration::from_millis(100)));
        assert_eq!(c.frames.len(), 4);
    }

    #[test]
    fn image_flags_and_positionals_keep_command_line_order() {
        let c = cfg(&["--image", "a.png", "b.png", "--image", "c.png"]);
        let names: Vec<_> = c
            .frames
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.png", "b.png", "c.png"]);
    }

    #[test]
    fn hires_frames_apply_only_on_wide_displays() {
        let c = cfg(&["--image", "lo.png", "--image-hires", "hi.png"]);
        assert_eq!(c.frames_for_width(1920)[0].to_str().unwrap(), "lo.png");
        assert_eq!(c.frames_for_width(2560)[0].to_str().unwrap(), "hi.png");

        let lo_only = cfg(&["--image", "lo.png"]);
        assert_eq!(lo_only.frames_for_width(2560)[0].to_str().unwrap(), "lo.png");
    }

    #[test]
    fn dev_mode_and_enable_vts_are_synonyms() {
        assert!(cfg(&["--dev-mode"]).vts_enabled());
        assert!(cfg(&["--enable-vts"]).vts_enabled());
        assert!(!cfg(&[]).vts_enabled());
    }

    #[test]
    fn negative_loop_start_disables_looping() {
        let c = cfg(&["--loop-start", "-1"]);
        assert_eq!(c.splash.loop_start, None);
    }
}
