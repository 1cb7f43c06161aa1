use std::fmt;

use crate::error::{Error, ErrorKind, Result};

/// The injected capability that resolves the identities sent during
/// authentication.
///
/// EXTERNAL and DBUS_COOKIE_SHA1 identify the caller differently: EXTERNAL
/// sends the authorization identity of the process (the numeric UID on
/// Unix), while the cookie mechanism names the user whose keyring holds the
/// cookie. The two resolutions are kept separate so a daemon that
/// authorizes by user name is not handed a UID.
pub trait IdentityResolver: Send + Sync {
    /// Resolve the authorization identity for EXTERNAL, as the ASCII string
    /// to be hex-encoded onto the wire.
    fn resolve_authorization_identity(&self) -> Result<String>;

    /// Resolve the user name for DBUS_COOKIE_SHA1.
    fn resolve_user_name(&self) -> Result<String>;
}

impl fmt::Debug for dyn IdentityResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdentityResolver")
    }
}

/// The default resolver: the real UID of the process for EXTERNAL, and the
/// account name owning that UID for the cookie mechanism.
#[derive(Debug, Default, Clone, Copy)]
pub struct UidIdentity;

impl IdentityResolver for UidIdentity {
    #[cfg(unix)]
    fn resolve_authorization_identity(&self) -> Result<String> {
        // SAFETY: getuid has no failure modes.
        let uid = unsafe { libc::getuid() };
        Ok(uid.to_string())
    }

    #[cfg(not(unix))]
    fn resolve_authorization_identity(&self) -> Result<String> {
        Err(Error::new(ErrorKind::IdentityUnavailable))
    }

    #[cfg(unix)]
    fn resolve_user_name(&self) -> Result<String> {
        if let Ok(user) = std::env::var("USER") {
            if !user.is_empty() {
                return Ok(user);
            }
        }

        // getpwuid(3): the returned record may live in static storage, so
        // the name is copied out immediately.
        let passwd = unsafe { libc::getpwuid(libc::getuid()) };

        if passwd.is_null() {
            return Err(Error::new(ErrorKind::IdentityUnavailable));
        }

        let name = unsafe { (*passwd).pw_name };

        if name.is_null() {
            return Err(Error::new(ErrorKind::IdentityUnavailable));
        }

        // SAFETY: a non-null pw_name points at a valid c-string.
        let name = unsafe { std::ffi::CStr::from_ptr(name) };

        match name.to_str() {
            Ok(name) if !name.is_empty() => Ok(name.to_owned()),
            _ => Err(Error::new(ErrorKind::IdentityUnavailable)),
        }
    }

    #[cfg(not(unix))]
    fn resolve_user_name(&self) -> Result<String> {
        Err(Error::new(ErrorKind::IdentityUnavailable))
    }
}

/// A fixed identity used for both mechanisms, mainly useful for tests and
/// for buses which authenticate a configured user.
#[derive(Debug, Clone)]
pub struct StaticIdentity(
    /// The identity string sent verbatim.
    pub String,
);

impl IdentityResolver for StaticIdentity {
    fn resolve_authorization_identity(&self) -> Result<String> {
        Ok(self.0.clone())
    }

    fn resolve_user_name(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}
