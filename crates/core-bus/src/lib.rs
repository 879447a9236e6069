//! core-bus: the system-bus endpoint and the peers it talks to.
//!
//! A single private libdbus channel serves both directions: the console's
//! own interface (VT switching, image RPCs, termination) and outgoing calls
//! to the compositor and power manager. The channel's watch fd plugs into
//! the main loop; messages are popped and classified there, never dispatched
//! from reentrant callbacks.
//!
//! The bus is routinely not up yet when the console starts at boot, so
//! initialization retries for a long while before declaring failure.

pub mod names;

use std::ffi::CString;
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use dbus::channel::{BusType, Channel};
use dbus::message::MessageType;
use dbus::Message;
use tracing::{debug, info, warn};

/// How long a synchronous method call may wait for its reply.
const REPLY_TIMEOUT: Duration = Duration::from_secs(3);
/// Bus acquisition retry cadence and give-up horizon.
const INIT_RETRY_DELAY: Duration = Duration::from_millis(50);
const INIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Options accepted by the `Image` RPC, each encoded as `name:value`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageRequest {
    pub image: Option<PathBuf>,
    pub location: Option<(u32, u32)>,
    pub offset: Option<(i32, i32)>,
}

impl ImageRequest {
    /// Parse the RPC's string arguments. Unknown names or malformed values
    /// fail the whole request.
    pub fn parse(args: &[&str]) -> Option<Self> {
        let mut req = Self::default();
        for arg in args {
            if arg.is_empty() {
                continue;
            }
            let (name, value) = arg.split_once(':')?;
            match name {
                "image" => req.image = Some(PathBuf::from(value)),
                "location" => req.location = Some(parse_pair(value)?),
                "offset" => req.offset = Some(parse_pair(value)?),
                _ => return None,
            }
        }
        req.image.is_some().then_some(req)
    }
}

fn parse_pair<T: std::str::FromStr>(v: &str) -> Option<(T, T)> {
    let (x, y) = v.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

/// A request popped off the bus, to be answered through [`Bus::reply_ok`] /
/// [`Bus::reply_not_handled`].
#[derive(Debug)]
pub enum BusEvent {
    SwitchVt { vt: u32, message: Message },
    MakeVt { vt: u32, message: Message },
    Terminate { message: Message },
    ShowImage { request: Option<ImageRequest>, message: Message },
    LoginPromptVisible,
}

pub struct Bus {
    channel: Channel,
}

impl Bus {
    /// Connect to the system bus, claim the console name and subscribe to
    /// the login-prompt signal. Retries until the bus appears or the
    /// timeout expires.
    pub fn connect() -> Result<Self> {
        let deadline = Instant::now() + INIT_TIMEOUT;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match Self::try_connect() {
                Ok(bus) => {
                    info!(target: "bus", attempts, "bus connected");
                    return Ok(bus);
                }
                Err(err) => {
                    if Instant::now() >= deadline {
                        return Err(err.context("bus never came up"));
                    }
                    debug!(target: "bus", attempts, %err, "bus not ready");
                    thread::sleep(INIT_RETRY_DELAY);
                }
            }
        }
    }

    fn try_connect() -> Result<Self> {
        let mut channel =
            Channel::get_private(BusType::System).context("cannot reach the system bus")?;
        channel.set_watch_enabled(true);

        let bus = Self { channel };
        bus.request_name(names::CONSOLE_SERVICE)
            .context("cannot claim console bus name")?;
        bus.add_match(&format!(
            "type='signal',interface='{}',member='{}'",
            names::SESSION_INTERFACE,
            names::SIGNAL_LOGIN_PROMPT_VISIBLE
        ))?;
        Ok(bus)
    }

    fn request_name(&self, name: &str) -> Result<()> {
        let msg = Message::new_method_call(
            "org.freedesktop.DBus",
            "/org/freedesktop/DBus",
            "org.freedesktop.DBus",
            "RequestName",
        )
        .map_err(|e| anyhow::anyhow!("{e}"))?
        .append2(name, 0u32);
        self.channel
            .send_with_reply_and_block(msg, REPLY_TIMEOUT)
            .context("RequestName failed")?;
        Ok(())
    }

    fn add_match(&self, rule: &str) -> Result<()> {
        let msg = Message::new_method_call(
            "org.freedesktop.DBus",
            "/org/freedesktop/DBus",
            "org.freedesktop.DBus",
            "AddMatch",
        )
        .map_err(|e| anyhow::anyhow!("{e}"))?
        .append1(rule);
        self.channel
            .send_with_reply_and_block(msg, REPLY_TIMEOUT)
            .context("AddMatch failed")?;
        Ok(())
    }

    /// The fd the main loop waits on.
    pub fn watch_fd(&self) -> RawFd {
        self.channel.watch().fd
    }

    /// Pull pending traffic off the socket and classify the next request.
    /// Returns `None` once the queue is dry.
    pub fn poll(&mut self) -> Option<BusEvent> {
        let _ = self.channel.read_write(Some(Duration::ZERO));
        while let Some(message) = self.channel.pop_message() {
            if let Some(event) = self.classify(message) {
                return Some(event);
            }
        }
        None
    }

    fn classify(&self, message: Message) -> Option<BusEvent> {
        match message.msg_type() {
            MessageType::Signal => {
                let iface = message.interface()?;
                let member = message.member()?;
                if &*iface == names::SESSION_INTERFACE
                    && &*member == names::SIGNAL_LOGIN_PROMPT_VISIBLE
                {
                    return Some(BusEvent::LoginPromptVisible);
                }
                None
            }
            MessageType::MethodCall => {
                let iface = message.interface()?;
                if &*iface != names::CONSOLE_INTERFACE {
                    return None;
                }
                let member = message.member()?.to_string();
                match member.as_str() {
                    names::METHOD_SWITCH_VT => {
                        // A missing/mistyped argument falls through as an
                        // out-of-range VT so the caller still gets a reply.
                        let vt: u32 = message.read1().unwrap_or(u32::MAX);
                        Some(BusEvent::SwitchVt { vt, message })
                    }
                    names::METHOD_MAKE_VT => {
                        let vt: u32 = message.read1().unwrap_or(u32::MAX);
                        Some(BusEvent::MakeVt { vt, message })
                    }
                    names::METHOD_TERMINATE => Some(BusEvent::Terminate { message }),
                    names::METHOD_IMAGE => {
                        let request = message
                            .read2::<String, String>()
                            .ok()
                            .and_then(|(a, b)| ImageRequest::parse(&[a.as_str(), b.as_str()]));
                        Some(BusEvent::ShowImage { request, message })
                    }
                    _ => {
                        debug!(target: "bus", method = member.as_str(), "unknown method");
                        None
                    }
                }
            }
            _ => None,
        }
    }

    /// Reply with a method return, optionally carrying a string.
    pub fn reply_ok(&self, message: &Message, body: Option<&str>) {
        let mut reply = message.method_return();
        if let Some(body) = body {
            reply = reply.append1(body);
        }
        let _ = self.channel.send(reply);
        self.channel.flush();
    }

    pub fn reply_not_handled(&self, message: &Message) {
        let name = "org.freedesktop.DBus.Error.Failed".into();
        let text = CString::new("Not handled").unwrap_or_default();
        let _ = self.channel.send(message.error(&name, &text));
        self.channel.flush();
    }

    // ---- outgoing calls ----------------------------------------------

    fn call_blocking(&self, msg: Message, what: &str) -> bool {
        match self.channel.send_with_reply_and_block(msg, REPLY_TIMEOUT) {
            Ok(_) => true,
            Err(err) => {
                warn!(target: "bus", %err, what, "bus call failed");
                false
            }
        }
    }

    fn send_oneway(&self, mut msg: Message) {
        msg.set_no_reply(true);
        let _ = self.channel.send(msg);
        self.channel.flush();
    }

    /// Ask the compositor to take scanout (we are going to background).
    pub fn take_display_ownership(&self) -> bool {
        let Ok(msg) = Message::new_method_call(
            names::COMPOSITOR_SERVICE,
            names::COMPOSITOR_PATH,
            names::COMPOSITOR_INTERFACE,
            names::METHOD_TAKE_OWNERSHIP,
        ) else {
            return false;
        };
        self.call_blocking(msg, names::METHOD_TAKE_OWNERSHIP)
    }

    /// Ask the compositor to release scanout before a terminal activates.
    pub fn release_display_ownership(&self) -> bool {
        let Ok(msg) = Message::new_method_call(
            names::COMPOSITOR_SERVICE,
            names::COMPOSITOR_PATH,
            names::COMPOSITOR_INTERFACE,
            names::METHOD_RELEASE_OWNERSHIP,
        ) else {
            return false;
        };
        self.call_blocking(msg, names::METHOD_RELEASE_OWNERSHIP)
    }

    pub fn report_user_activity(&self) {
        if let Ok(msg) = Message::new_method_call(
            names::POWER_SERVICE,
            names::POWER_PATH,
            names::POWER_INTERFACE,
            names::METHOD_USER_ACTIVITY,
        ) {
            self.send_oneway(msg.append1(0u32));
        }
    }

    pub fn brightness_up(&self) {
        if let Ok(msg) = Message::new_method_call(
            names::POWER_SERVICE,
            names::POWER_PATH,
            names::POWER_INTERFACE,
            names::METHOD_BRIGHTNESS_UP,
        ) {
            self.send_oneway(msg);
        }
    }

    /// Dim one step, never all the way off.
    pub fn brightness_down(&self) {
        if let Ok(msg) = Message::new_method_call(
            names::POWER_SERVICE,
            names::POWER_PATH,
            names::POWER_INTERFACE,
            names::METHOD_BRIGHTNESS_DOWN,
        ) {
            self.send_oneway(msg.append1(false));
        }
    }
}

/// Validate a VT number against the standard-terminal range; used by both
/// RPC handlers so they reject the same way.
pub fn valid_vt(vt: u32, max: usize) -> bool {
    vt >= 1 && (vt as usize) <= max
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn image_request_parses_both_args() {
        let req =
            ImageRequest::parse(&["image:/usr/share/foo.png", "location:10,20"]).unwrap();
        assert_eq!(req.image.as_deref(), Some(std::path::Path::new("/usr/share/foo.png")));
        assert_eq!(req.location, Some((10, 20)));
        assert_eq!(req.offset, None);
    }

    #[test]
    fn image_request_accepts_offsets() {
        let req = ImageRequest::parse(&["image:/a.png", "offset:-5,9"]).unwrap();
        assert_eq!(req.offset, Some((-5, 9)));
    }

    #[test]
    fn image_request_requires_an_image() {
        assert_eq!(ImageRequest::parse(&["location:1,2", ""]), None);
    }

    #[test]
    fn image_request_rejects_unknown_names() {
        assert_eq!(ImageRequest::parse(&["image:/a.png", "rotate:90"]), None);
        assert_eq!(ImageRequest::parse(&["image:/a.png", "location:x,y"]), None);
    }

    #[test]
    fn vt_bounds() {
        assert!(!valid_vt(0, 3));
        assert!(valid_vt(1, 3));
        assert!(valid_vt(3, 3));
        assert!(!valid_vt(4, 3));
    }
}
