//! core-display: KMS display acquisition, mode setting and scanout buffers.
//!
//! One `Display` is selected per process by scanning the DRM minors and
//! scoring their connectors; terminals borrow it through `Rc` to build their
//! `Framebuffer`s. All mutation happens on the main loop thread, so interior
//! state (EDID cache, delayed framebuffer removal) uses `Cell`/`RefCell`
//! rather than locks.

mod card;
mod display;
mod edid;
mod fb;
mod gamma;

pub use card::Card;
pub use display::{rescan, Display, DisplayHandle};
pub use edid::{scaling_for_size, DetailedTiming, EDID_SIZE};
pub use fb::Framebuffer;
pub use gamma::{load_gamma_ramp, GammaRamp};
