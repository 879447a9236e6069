//! core-term: PTY-backed terminals rendered into KMS framebuffers.
//!
//! The crate splits into the emulator proper (`screen` + `vt`), the process
//! plumbing (`pty`), compositing (`image`, `osc`) and the lifecycle layer
//! (`terminal`, `table`) the main loop drives.

pub mod color;
pub mod image;
pub mod osc;
pub mod pty;
pub mod screen;
pub mod table;
pub mod terminal;
pub mod vt;

pub use image::{Image, Placement};
pub use osc::{GfxCommand, GfxSpec};
pub use screen::{Attrs, Screen};
pub use table::{TerminalTable, MAX_STD_TERMINALS, MAX_TERMINALS, SPLASH_TERMINAL};
pub use terminal::{TermOptions, Terminal, SCROLLBACK_SIZE};
pub use vt::{KeySym, Vt};
