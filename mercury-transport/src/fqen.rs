//! Fully-qualified event names.
//!
//! Events travel as `"<name>::v<version>"`, for example `whoami::v2020_12_25`.
//! The version suffix is opaque: it is parsed here only so that log lines can
//! carry the name and version as separate fields. Emission never rewrites or
//! rejects a name.

use std::fmt;

/// Assert an identity on the current connection
pub const AUTHENTICATE: &str = "authenticate::v2020_12_25";
/// Replace the set of events this connection answers
pub const REGISTER_LISTENERS: &str = "register-listeners::v2020_12_25";
/// Describe the identity attached to the current connection
pub const WHOAMI: &str = "whoami::v2020_12_25";
/// Start a phone PIN login
pub const REQUEST_PIN: &str = "request-pin::v2020_12_25";
/// Complete a phone PIN login
pub const CONFIRM_PIN: &str = "confirm-pin::v2020_12_25";
/// Register an event contract
pub const REGISTER_EVENTS: &str = "register-events::v2020_12_25";
/// Install a skill into an organization
pub const INSTALL_SKILL: &str = "install-skill::v2020_12_25";
/// Register a new skill
pub const REGISTER_SKILL: &str = "register-skill::v2020_12_25";
/// Create an organization
pub const CREATE_ORGANIZATION: &str = "create-organization::v2020_12_25";

/// Every event name owned by the backend itself
pub const RESERVED: &[&str] = &[
    AUTHENTICATE,
    REGISTER_LISTENERS,
    WHOAMI,
    REQUEST_PIN,
    CONFIRM_PIN,
    REGISTER_EVENTS,
    INSTALL_SKILL,
    REGISTER_SKILL,
    CREATE_ORGANIZATION,
];

/// Whether `event` is one of the backend's built-in names
pub fn is_reserved(event: &str) -> bool {
    RESERVED.contains(&event)
}

/// A borrowed view of an event name split into name and optional version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventName<'a> {
    name: &'a str,
    version: Option<&'a str>,
}

impl<'a> EventName<'a> {
    /// Split `event` on its last `::v` separator.
    ///
    /// Names without a well-formed suffix are kept whole with no version.
    pub fn parse(event: &'a str) -> Self {
        match event.rsplit_once("::v") {
            Some((name, version)) if !name.is_empty() && !version.is_empty() => Self {
                name,
                version: Some(version),
            },
            _ => Self {
                name: event,
                version: None,
            },
        }
    }

    /// The name without its version suffix
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// The version without its `v` prefix
    pub fn version(&self) -> Option<&'a str> {
        self.version
    }

    /// Whether a version suffix was present
    pub fn is_versioned(&self) -> bool {
        self.version.is_some()
    }
}

impl fmt::Display for EventName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(version) => write!(f, "{}::v{}", self.name, version),
            None => f.write_str(self.name),
        }
    }
}
