//! Bus names, paths and members for the console endpoint and its peers.

pub const CONSOLE_SERVICE: &str = "org.vtcon.Console";
pub const CONSOLE_PATH: &str = "/org/vtcon/Console";
pub const CONSOLE_INTERFACE: &str = "org.vtcon.Console";

pub const METHOD_SWITCH_VT: &str = "SwitchVT";
pub const METHOD_MAKE_VT: &str = "MakeVT";
pub const METHOD_TERMINATE: &str = "Terminate";
pub const METHOD_IMAGE: &str = "Image";

/// The compositor-side display ownership service.
pub const COMPOSITOR_SERVICE: &str = "org.display.Manager";
pub const COMPOSITOR_PATH: &str = "/org/display/Manager";
pub const COMPOSITOR_INTERFACE: &str = "org.display.Manager";
pub const METHOD_TAKE_OWNERSHIP: &str = "TakeDisplayOwnership";
pub const METHOD_RELEASE_OWNERSHIP: &str = "ReleaseDisplayOwnership";

/// The power manager.
pub const POWER_SERVICE: &str = "org.power.Manager";
pub const POWER_PATH: &str = "/org/power/Manager";
pub const POWER_INTERFACE: &str = "org.power.Manager";
pub const METHOD_USER_ACTIVITY: &str = "HandleUserActivity";
pub const METHOD_BRIGHTNESS_UP: &str = "IncreaseScreenBrightness";
pub const METHOD_BRIGHTNESS_DOWN: &str = "DecreaseScreenBrightness";

/// The session manager announces the login prompt.
pub const SESSION_SERVICE: &str = "org.session.Manager";
pub const SESSION_PATH: &str = "/org/session/Manager";
pub const SESSION_INTERFACE: &str = "org.session.Manager";
pub const SIGNAL_LOGIN_PROMPT_VISIBLE: &str = "LoginPromptVisible";
