//! Process-level plumbing: daemonizing, the boot-handoff lock and the
//! master-relax switch.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use nix::fcntl::{open, Flock, FlockArg, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{chown, dup2, fork, setsid, ForkResult, User};
use tracing::{error, warn};

/// Written "Y" so userspace may preempt DRM master across the
/// compositor/console handoff.
const MASTER_RELAX_PATH: &str = "/sys/kernel/debug/dri/drm_master_relax";

/// Advisory lock serializing the boot display handoff with the UI bringup.
const BOOT_LOCK_PATH: &str = "/run/vtcon";
const BOOT_LOCK_OWNER: &str = "chronos";

/// Detach from the controlling terminal; stdio ends up on the kernel log.
pub fn daemonize() -> Result<()> {
    match unsafe { fork() }.context("fork failed")? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }
    setsid().context("setsid failed")?;

    for fd in 0..=2 {
        let _ = nix::unistd::close(fd);
    }
    // The first open lands on fd 0; mirror it onto stdout/stderr.
    let fd = open(Path::new("/dev/kmsg"), OFlag::O_RDWR, Mode::empty())
        .context("cannot open /dev/kmsg")?;
    dup2(fd, 1).context("dup2 stdout")?;
    dup2(fd, 2).context("dup2 stderr")?;
    Ok(())
}

/// Allow this process to take DRM master away from a cooperative holder.
/// Returns false (after logging) when the switch cannot be thrown, in which
/// case VT switching stays off.
pub fn enable_master_relax() -> bool {
    match std::fs::write(MASTER_RELAX_PATH, "Y") {
        Ok(()) => true,
        Err(err) => {
            error!(target: "sys", %err, "unable to set drm_master_relax");
            false
        }
    }
}

/// Holder of the `/run` advisory lock. Dropping it releases the lock.
#[derive(Default)]
pub struct BootLock {
    held: Option<Flock<File>>,
}

impl BootLock {
    pub fn acquire(&mut self) {
        if self.held.is_some() {
            return;
        }
        let file = match std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(BOOT_LOCK_PATH)
        {
            Ok(f) => f,
            Err(err) => {
                warn!(target: "sys", %err, "cannot open boot lock");
                return;
            }
        };

        // The UI bringup runs as chronos and takes the same lock.
        match User::from_name(BOOT_LOCK_OWNER) {
            Ok(Some(user)) => {
                if let Err(err) = chown(BOOT_LOCK_PATH, Some(user.uid), Some(user.gid)) {
                    warn!(target: "sys", %err, "boot lock chown failed");
                }
            }
            _ => warn!(target: "sys", owner = BOOT_LOCK_OWNER, "lock owner unknown"),
        }

        match Flock::lock(file, FlockArg::LockExclusive) {
            Ok(lock) => self.held = Some(lock),
            Err((_, err)) => warn!(target: "sys", %err, "boot lock failed"),
        }
    }

    pub fn release(&mut self) {
        if let Some(lock) = self.held.take() {
            if let Err((_, err)) = lock.unlock() {
                warn!(target: "sys", %err, "boot unlock failed");
            }
        }
    }
}
