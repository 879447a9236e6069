//! PTY pair with a child process and a bridge fd for the main loop.
//!
//! The bridge is an epoll instance holding the master end; the main loop
//! selects on the bridge and the terminal drains the master through it. The
//! master stays non-blocking so a stalled child can never wedge the loop.

use std::ffi::CString;
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};

use anyhow::{Context, Result};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::{openpty, Winsize};
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{dup2, execv, fork, setsid, ForkResult, Pid};
use tracing::warn;

nix::ioctl_write_ptr_bad!(tiocswinsz, libc::TIOCSWINSZ, Winsize);
nix::ioctl_write_int_bad!(tiocsctty, libc::TIOCSCTTY);
nix::ioctl_read!(tiocgptn, b'T', 0x30, libc::c_uint);

#[derive(Debug)]
pub struct Pty {
    master: OwnedFd,
    bridge: Epoll,
    child: Pid,
}

impl Pty {
    /// Open a PTY pair and exec `argv` on the slave side with `TERM=xterm`.
    pub fn spawn(argv: &[&str], cols: u16, rows: u16) -> Result<Self> {
        let winsize = Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let pair = openpty(&winsize, None::<&nix::sys::termios::Termios>).context("openpty failed")?;

        let child = match unsafe { fork() }.context("fork failed")? {
            ForkResult::Child => {
                // Child: new session, slave becomes the controlling tty and
                // stdio, then exec. Only exit on failure; nothing here
                // returns.
                drop(pair.master);
                let slave = pair.slave.as_raw_fd();
                let _ = setsid();
                let _ = unsafe { tiocsctty(slave, 0) };
                for fd in 0..=2 {
                    let _ = dup2(slave, fd);
                }
                if slave > 2 {
                    drop(pair.slave);
                }
                std::env::set_var("TERM", "xterm");
                let cargv: Vec<CString> = argv
                    .iter()
                    .map(|a| CString::new(*a).unwrap_or_default())
                    .collect();
                let _ = execv(&cargv[0], &cargv);
                std::process::exit(1);
            }
            ForkResult::Parent { child } => child,
        };
        drop(pair.slave);

        let master = pair.master;
        fcntl(master.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK))
            .context("cannot make pty master non-blocking")?;

        let bridge = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).context("bridge epoll failed")?;
        bridge
            .add(&master, EpollEvent::new(EpollFlags::EPOLLIN, 0))
            .context("bridge add failed")?;

        Ok(Self {
            master,
            bridge,
            child,
        })
    }

    /// The fd the main loop waits on.
    pub fn bridge_fd(&self) -> RawFd {
        self.bridge.0.as_raw_fd()
    }

    pub fn child(&self) -> Pid {
        self.child
    }

    /// Read everything currently buffered on the master into `sink`.
    pub fn drain(&mut self, mut sink: impl FnMut(&[u8])) {
        let mut buf = [0u8; 4096];
        loop {
            match nix::unistd::read(self.master.as_raw_fd(), &mut buf) {
                Ok(0) => break,
                Ok(n) => sink(&buf[..n]),
                Err(nix::errno::Errno::EINTR) => continue,
                // EIO shows up once the child side is gone; the main loop
                // notices the dead child separately.
                Err(nix::errno::Errno::EAGAIN) | Err(nix::errno::Errno::EIO) => break,
                Err(err) => {
                    warn!(target: "term.pty", %err, "pty read failed");
                    break;
                }
            }
        }
    }

    /// Write keyboard bytes toward the child. A full master buffer drops the
    /// remainder rather than blocking the loop.
    pub fn write_all(&self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            match nix::unistd::write(self.master.as_fd(), bytes) {
                Ok(0) => break,
                Ok(n) => bytes = &bytes[n..],
                Err(nix::errno::Errno::EINTR) => continue,
                Err(nix::errno::Errno::EAGAIN) => {
                    warn!(target: "term.pty", dropped = bytes.len(), "pty write queue full");
                    break;
                }
                Err(err) => {
                    warn!(target: "term.pty", %err, "pty write failed");
                    break;
                }
            }
        }
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let winsize = Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        unsafe { tiocswinsz(self.master.as_raw_fd(), &winsize) }
            .context("TIOCSWINSZ failed")?;
        Ok(())
    }

    /// True once the child has exited (non-blocking).
    pub fn child_exited(&self) -> bool {
        match waitpid(self.child, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => false,
            Ok(_) => true,
            // Reaped elsewhere or no child: treat as still running so the
            // caller does not respawn in a loop.
            Err(_) => false,
        }
    }

    /// Path of the slave side, e.g. `/dev/pts/3`.
    pub fn pts_name(&self) -> Result<String> {
        let mut n: libc::c_uint = 0;
        unsafe { tiocgptn(self.master.as_raw_fd(), &mut n) }.context("TIOCGPTN failed")?;
        Ok(format!("/dev/pts/{n}"))
    }
}

impl Drop for Pty {
    fn drop(&mut self) {
        // Closing the master delivers SIGHUP to the foreground process
        // group; nudge the child and reap it if it is already gone.
        let _ = kill(self.child, Signal::SIGHUP);
        let _ = waitpid(self.child, Some(WaitPidFlag::WNOHANG));
    }
}
