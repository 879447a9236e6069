//! core-splash: the boot image sequence.
//!
//! The player owns the frame list and the pacing; putting pixels on screen
//! and pumping the main loop go through [`SplashHost`], which the binary
//! implements over the splash terminal. Scheduling is a plain iterator so
//! the loop arithmetic is testable without a clock, and the pacer never
//! accumulates drift: a slow frame only truncates the next sleep.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use core_term::{Image, Placement};
use tracing::{debug, warn};

/// Frame duration when no `--frame-interval` is given.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct Frame {
    pub path: PathBuf,
    pub duration: Duration,
}

/// Loop-region and placement tunables, straight from the command line.
#[derive(Debug, Clone)]
pub struct SplashConfig {
    /// 0xRRGGBB fill behind the frames.
    pub clear: u32,
    pub default_duration: Duration,
    pub loop_start: Option<usize>,
    /// Extra passes over the loop region; -1 repeats forever.
    pub loop_count: i32,
    pub loop_duration: Option<Duration>,
    pub loop_offset: Option<(i32, i32)>,
    /// Default offset applied to every frame outside the loop region.
    pub offset: Option<(i32, i32)>,
}

impl Default for SplashConfig {
    fn default() -> Self {
        Self {
            clear: 0x000000,
            default_duration: DEFAULT_FRAME_INTERVAL,
            loop_start: None,
            loop_count: -1,
            loop_duration: None,
            loop_offset: None,
            offset: None,
        }
    }
}

/// One scheduled show: which frame, the minimum interval since the previous
/// show, and whether it belongs to the loop region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub index: usize,
    pub wait: Duration,
    pub looped: bool,
}

/// The full show order. Infinite when `loop_count` is -1, so callers
/// iterate rather than collect.
pub fn schedule<'a>(
    frames: &'a [Frame],
    cfg: &'a SplashConfig,
) -> impl Iterator<Item = Step> + 'a {
    let first_pass = frames.iter().enumerate().map(|(index, frame)| Step {
        index,
        wait: frame.duration,
        looped: false,
    });

    let loop_start = cfg.loop_start.filter(|&s| s < frames.len());
    let passes: Box<dyn Iterator<Item = usize>> = match (loop_start, cfg.loop_count) {
        (None, _) | (_, 0) => Box::new(std::iter::empty()),
        (Some(_), n) if n < 0 => Box::new(0usize..usize::MAX),
        (Some(_), n) => Box::new(0usize..n as usize),
    };
    let looped = passes.flat_map(move |_| {
        let start = loop_start.unwrap_or_default();
        frames[start..].iter().enumerate().map(move |(i, frame)| Step {
            index: start + i,
            wait: cfg.loop_duration.unwrap_or(frame.duration),
            looped: true,
        })
    });

    first_pass.chain(looped)
}

/// Frame pacing against a monotonic clock.
#[derive(Debug, Default)]
pub struct Pacer {
    last_show: Option<Instant>,
}

impl Pacer {
    /// How long to sleep before the next show may happen.
    pub fn sleep_needed(&self, wait: Duration, now: Instant) -> Duration {
        match self.last_show {
            None => Duration::ZERO,
            Some(last) => wait.saturating_sub(now.duration_since(last)),
        }
    }

    pub fn mark_shown(&mut self, now: Instant) {
        self.last_show = Some(now);
    }
}

/// Everything the player needs from the process around it.
pub trait SplashHost {
    /// Composite one frame onto the splash terminal.
    fn show_image(&mut self, image: &Image) -> Result<()>;
    /// Run one main-loop iteration with a ~1 microsecond timeout.
    /// An error means the splash terminal died and the show is over.
    fn pump(&mut self) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct Player {
    frames: Vec<Frame>,
    config: SplashConfig,
}

impl Player {
    pub fn new(config: SplashConfig) -> Self {
        Self {
            frames: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &SplashConfig {
        &self.config
    }

    pub fn add_frame(&mut self, path: PathBuf) {
        self.frames.push(Frame {
            path,
            duration: self.config.default_duration,
        });
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Play the sequence. Each frame is decoded, shown on schedule and freed
    /// before the next; the main loop gets one iteration per frame so input
    /// and bus traffic keep flowing during the show.
    pub fn run(&mut self, host: &mut impl SplashHost) -> Result<()> {
        let mut pacer = Pacer::default();

        for step in schedule(&self.frames, &self.config) {
            let frame = &self.frames[step.index];
            let mut image = Image::load(&frame.path)
                .with_context(|| format!("splash frame {}", frame.path.display()))
                .inspect_err(|err| warn!(target: "splash", %err, "frame dropped, stopping"))?;

            let offset = if step.looped {
                self.config.loop_offset.or(self.config.offset)
            } else {
                self.config.offset
            };
            image.placement = Placement {
                location: None,
                offset,
                scale: 0,
            };

            let sleep = pacer.sleep_needed(step.wait, Instant::now());
            if !sleep.is_zero() {
                thread::sleep(sleep);
            }

            host.show_image(&image)?;
            pacer.mark_shown(Instant::now());
            debug!(target: "splash", index = step.index, looped = step.looped, "frame shown");

            host.pump()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn frames(n: usize, ms: u64) -> Vec<Frame> {
        (0..n)
            .map(|i| Frame {
                path: PathBuf::from(format!("{i}.png")),
                duration: Duration::from_millis(ms),
            })
            .collect()
    }

    #[test]
    fn plain_sequence_runs_once() {
        let cfg = SplashConfig {
            loop_start: None,
            ..SplashConfig::default()
        };
        let steps: Vec<Step> = schedule(&frames(3, 50), &cfg).collect();
        assert_eq!(
            steps.iter().map(|s| s.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(steps.iter().all(|s| !s.looped));
    }

    #[test]
    fn loop_region_repeats_with_loop_interval() {
        // --frame-interval 50 --loop-start 2 --loop-count 3 --loop-interval 100
        let cfg = SplashConfig {
            loop_start: Some(2),
            loop_count: 3,
            loop_duration: Some(Duration::from_millis(100)),
            default_duration: Duration::from_millis(50),
            ..SplashConfig::default()
        };
        let steps: Vec<Step> = schedule(&frames(4, 50), &cfg).collect();
        assert_eq!(
            steps.iter().map(|s| s.index).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 2, 3, 2, 3, 2, 3]
        );
        let waits: Vec<u64> = steps.iter().map(|s| s.wait.as_millis() as u64).collect();
        assert_eq!(waits, vec![50, 50, 50, 50, 100, 100, 100, 100, 100, 100]);
    }

    #[test]
    fn infinite_loop_keeps_yielding() {
        let cfg = SplashConfig {
            loop_start: Some(0),
            loop_count: -1,
            ..SplashConfig::default()
        };
        let steps: Vec<Step> = schedule(&frames(2, 10), &cfg).take(9).collect();
        assert_eq!(
            steps.iter().map(|s| s.index).collect::<Vec<_>>(),
            vec![0, 1, 0, 1, 0, 1, 0, 1, 0]
        );
    }

    #[test]
    fn out_of_range_loop_start_disables_looping() {
        let cfg = SplashConfig {
            loop_start: Some(7),
            loop_count: 3,
            ..SplashConfig::default()
        };
        assert_eq!(schedule(&frames(2, 10), &cfg).count(), 2);
    }

    #[test]
    fn pacer_truncates_instead_of_drifting() {
        let mut pacer = Pacer::default();
        let t0 = Instant::now();
        // First frame shows immediately.
        assert_eq!(pacer.sleep_needed(Duration::from_millis(50), t0), Duration::ZERO);
        pacer.mark_shown(t0);

        // 20 ms later, a 50 ms frame still owes 30 ms.
        let t1 = t0 + Duration::from_millis(20);
        assert_eq!(
            pacer.sleep_needed(Duration::from_millis(50), t1),
            Duration::from_millis(30)
        );

        // A slow iteration (70 ms since the show) owes nothing, and the debt
        // does not carry into the next interval.
        let t2 = t0 + Duration::from_millis(70);
        assert_eq!(pacer.sleep_needed(Duration::from_millis(50), t2), Duration::ZERO);
        pacer.mark_shown(t2);
        let t3 = t2 + Duration::from_millis(50);
        assert_eq!(pacer.sleep_needed(Duration::from_millis(50), t3), Duration::ZERO);
    }
}
