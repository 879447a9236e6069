//! vtcon entrypoint: parse flags, bring the subsystems up, play the splash,
//! then sit in the readiness loop until told to stop.

mod app;
mod config;
mod sys;

use std::process::ExitCode;
use std::sync::Once;

use anyhow::{Context, Result};
use core_bus::Bus;
use core_display::{load_gamma_ramp, Display};
use core_input::Input;
use core_splash::Player;
use core_term::{Terminal, SPLASH_TERMINAL};
use tracing::{error, info, warn};

use crate::app::{App, LoopStatus, SplashScreenHost};
use crate::config::Config;
use crate::sys::BootLock;

fn main() -> ExitCode {
    let cfg = match config::parse() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("vtcon: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    if cfg.args.daemon {
        if let Err(err) = sys::daemonize() {
            eprintln!("vtcon: {err:#}");
            return ExitCode::FAILURE;
        }
    }

    configure_logging();
    install_panic_hook();
    info!(target: "runtime", daemon = cfg.args.daemon, "startup");

    match run(cfg) {
        Ok(code) => code,
        Err(err) => {
            error!(target: "runtime", err = %format!("{err:#}"), "fatal");
            ExitCode::FAILURE
        }
    }
}

fn configure_logging() {
    // Everything goes to stderr; in daemon mode that is /dev/kmsg.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .without_time()
        .compact()
        .try_init();
}

fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!(target: "runtime.panic", ?info, "panic");
            default_panic(info);
        }));
    });
}

fn run(cfg: Config) -> Result<ExitCode> {
    let input = Input::new().context("input init failed")?;

    let display = Display::scan(!input.lid_closed());
    if display.is_none() {
        warn!(target: "runtime", "no display available, running headless");
    }

    if cfg.args.print_resolution {
        let Some(display) = &display else {
            error!(target: "runtime", "no display to report");
            return Ok(ExitCode::FAILURE);
        };
        let (w, h) = display.resolution();
        println!("{w} {h}");
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(path) = &cfg.args.gamma {
        // A malformed ramp file is a configuration error even when headless.
        let ramp = load_gamma_ramp(path)?;
        if let Some(display) = &display {
            display.set_gamma(&ramp)?;
        }
    }

    let bus = Bus::connect()?;

    let mut app = App::new(
        display,
        input,
        bus,
        cfg.args.enable_gfx,
        cfg.vts_enabled(),
        cfg.args.no_login,
    )?;

    if cfg.vts_enabled() && !sys::enable_master_relax() {
        // Without the relax switch the compositor handoff cannot work, so
        // there is no point holding resources for it.
        warn!(target: "runtime", "VT switching disabled");
    }

    let width = app.display.as_ref().map_or(0, |d| d.resolution().0);
    let frames = cfg.frames_for_width(width).to_vec();
    if !frames.is_empty() {
        let mut lock = BootLock::default();
        lock.acquire();
        let outcome = play_splash(&mut app, &cfg, &frames);
        // The splash is done (or dead) either way: let go of the slot and
        // hand the display over so the compositor can start drawing.
        app.table.set_current_to(None);
        app.hand_display_to_compositor();
        lock.release();

        if let Err(err) = outcome {
            warn!(target: "splash", err = %format!("{err:#}"), "splash ended early");
        }
        if cfg.args.splash_only {
            return Ok(exit_code(app.exit.unwrap_or(0)));
        }
    } else if cfg.args.splash_only {
        return Ok(ExitCode::SUCCESS);
    }

    // The resident phase: VT terminals and the control endpoint.
    while app.exit.is_none() {
        if app.run_iteration(0) == LoopStatus::SplashDied {
            app.table.set(SPLASH_TERMINAL, None);
            app.table.set_current(0);
        }
    }
    Ok(exit_code(app.exit.unwrap_or(0)))
}

fn play_splash(app: &mut App, cfg: &Config, frames: &[std::path::PathBuf]) -> Result<()> {
    let mut term = Terminal::new(false, &app.term_options()).context("splash terminal")?;
    term.set_background(cfg.splash.clear);
    term.hide_cursor();
    term.clear_surface(cfg.splash.clear);
    app.table.set(SPLASH_TERMINAL, Some(term));
    app.table.set_current(SPLASH_TERMINAL);
    if let Some(term) = app.table.current_mut() {
        term.activate().context("splash mode set")?;
    }

    let mut player = Player::new(cfg.splash.clone());
    for frame in frames {
        player.add_frame(frame.clone());
    }
    info!(target: "splash", frames = player.frame_count(), "splash starting");
    player.run(&mut SplashScreenHost { app })
}

fn exit_code(code: i32) -> ExitCode {
    if code == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
