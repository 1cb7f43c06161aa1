//! Parsing of D-Bus server addresses.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, ErrorKind, Result};

const ENV_SESSION_BUS: &str = "DBUS_SESSION_BUS_ADDRESS";
const ENV_SYSTEM_BUS: &str = "DBUS_SYSTEM_BUS_ADDRESS";
const DEFAULT_SYSTEM_BUS: &str = "unix:path=/var/run/dbus/system_bus_socket";

/// A parsed D-Bus server address.
///
/// Two transports are supported, selected by scheme:
/// `unix:path=<path>` / `unix:abstract=<name>` and `tcp:host=<h>,port=<p>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// A Unix domain stream socket bound to a filesystem path.
    Unix {
        /// The socket path.
        path: PathBuf,
    },
    /// A Unix domain stream socket in the Linux abstract namespace.
    UnixAbstract {
        /// The abstract socket name, without the leading NUL.
        name: String,
    },
    /// A plain TCP connection.
    Tcp {
        /// Host name or IP address.
        host: String,
        /// TCP port.
        port: u16,
    },
}

impl Address {
    /// The session bus address, from `DBUS_SESSION_BUS_ADDRESS`.
    pub fn session_bus() -> Result<Self> {
        match env::var(ENV_SESSION_BUS) {
            Ok(value) => value.parse(),
            Err(..) => Err(Error::new(ErrorKind::MissingBus)),
        }
    }

    /// The system bus address, from `DBUS_SYSTEM_BUS_ADDRESS` with a
    /// fallback to the well-known default socket.
    pub fn system_bus() -> Result<Self> {
        match env::var(ENV_SYSTEM_BUS) {
            Ok(value) => value.parse(),
            Err(..) => DEFAULT_SYSTEM_BUS.parse(),
        }
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::new(ErrorKind::InvalidAddress(s.into()));

        let (scheme, rest) = s.split_once(':').ok_or_else(invalid)?;

        let mut path = None;
        let mut abstract_name = None;
        let mut host = None;
        let mut port = None;

        for pair in rest.split(',') {
            let (key, value) = pair.split_once('=').ok_or_else(invalid)?;

            match key {
                "path" => path = Some(value),
                "abstract" => abstract_name = Some(value),
                "host" => host = Some(value),
                "port" => port = Some(value.parse::<u16>().map_err(|_| invalid())?),
                // Unrecognized keys such as `guid` are ignored.
                _ => {}
            }
        }

        match scheme {
            "unix" => match (path, abstract_name) {
                (Some(path), None) => Ok(Address::Unix { path: path.into() }),
                (None, Some(name)) => Ok(Address::UnixAbstract { name: name.into() }),
                _ => Err(invalid()),
            },
            "tcp" => match (host, port) {
                (Some(host), Some(port)) => Ok(Address::Tcp {
                    host: host.into(),
                    port,
                }),
                _ => Err(invalid()),
            },
            _ => Err(invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_path() {
        let address: Address = "unix:path=/run/user/1000/bus".parse().unwrap();
        assert_eq!(
            address,
            Address::Unix {
                path: "/run/user/1000/bus".into()
            }
        );
    }

    #[test]
    fn unix_abstract() {
        let address: Address = "unix:abstract=/tmp/dbus-Abcdef".parse().unwrap();
        assert_eq!(
            address,
            Address::UnixAbstract {
                name: "/tmp/dbus-Abcdef".into()
            }
        );
    }

    #[test]
    fn tcp() {
        let address: Address = "tcp:host=localhost,port=12345".parse().unwrap();
        assert_eq!(
            address,
            Address::Tcp {
                host: "localhost".into(),
                port: 12345
            }
        );
    }

    #[test]
    fn extra_keys_ignored() {
        let address: Address = "unix:path=/run/bus,guid=deadbeef".parse().unwrap();
        assert_eq!(
            address,
            Address::Unix {
                path: "/run/bus".into()
            }
        );
    }

    #[test]
    fn rejects_malformed() {
        for s in [
            "",
            "unix",
            "unix:",
            "unix:abstract=/x,path=/y",
            "tcp:host=localhost",
            "tcp:host=localhost,port=notaport",
            "vsock:cid=1,port=2",
        ] {
            assert!(s.parse::<Address>().is_err(), "{s:?} should be invalid");
        }
    }
}
