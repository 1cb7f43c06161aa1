//! Validation of bus, interface and member names.
//!
//! Propagating an invalid name to the daemon is worse than failing locally,
//! so these checks run both on builder input and on decoded headers.

use crate::error::{Error, ErrorKind, Result};

const MAX_NAME_LENGTH: usize = 255;

fn invalid(kind: &'static str, name: &str) -> Error {
    Error::new(ErrorKind::InvalidName {
        kind,
        name: name.into(),
    })
}

/// Validate an interface name: two or more dot-separated elements, each
/// starting with `[A-Za-z_]` and continuing with `[A-Za-z0-9_]`.
pub(crate) fn validate_interface(name: &str) -> Result<()> {
    validate_dotted(name, false, false).map_err(|()| invalid("interface name", name))
}

/// Validate an error name. Error names share the interface-name grammar.
pub(crate) fn validate_error_name(name: &str) -> Result<()> {
    validate_dotted(name, false, false).map_err(|()| invalid("error name", name))
}

/// Validate a bus name: either a unique name such as `:1.42` or a well-known
/// name such as `org.freedesktop.DBus`. Bus names additionally permit
/// hyphens, and unique-name elements may start with a digit.
pub(crate) fn validate_bus_name(name: &str) -> Result<()> {
    let result = match name.strip_prefix(':') {
        Some(rest) => validate_dotted(rest, true, true),
        None => validate_dotted(name, false, true),
    };

    result.map_err(|()| invalid("bus name", name))
}

/// Validate a member name: a single element of `[A-Za-z_][A-Za-z0-9_]*`.
pub(crate) fn validate_member(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
        return Err(invalid("member name", name));
    }

    let bytes = name.as_bytes();

    if bytes[0].is_ascii_digit() {
        return Err(invalid("member name", name));
    }

    if !bytes
        .iter()
        .all(|&b| b.is_ascii_alphanumeric() || b == b'_')
    {
        return Err(invalid("member name", name));
    }

    Ok(())
}

fn validate_dotted(name: &str, digits_lead: bool, hyphens: bool) -> Result<(), ()> {
    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
        return Err(());
    }

    let mut elements = 0;

    for element in name.split('.') {
        let bytes = element.as_bytes();

        let Some(&first) = bytes.first() else {
            return Err(());
        };

        if !digits_lead && first.is_ascii_digit() {
            return Err(());
        }

        if !bytes
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || b == b'_' || (hyphens && b == b'-'))
        {
            return Err(());
        }

        elements += 1;
    }

    if elements < 2 {
        return Err(());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interfaces() {
        assert!(validate_interface("org.freedesktop.DBus").is_ok());
        assert!(validate_interface("a.b").is_ok());
        assert!(validate_interface("org").is_err());
        assert!(validate_interface("org..DBus").is_err());
        assert!(validate_interface("org.2foo").is_err());
        assert!(validate_interface("org.foo-bar").is_err());
        assert!(validate_interface("").is_err());
    }

    #[test]
    fn bus_names() {
        assert!(validate_bus_name(":1.42").is_ok());
        assert!(validate_bus_name("org.freedesktop.DBus").is_ok());
        assert!(validate_bus_name("com.example.my-service").is_ok());
        assert!(validate_bus_name(":1").is_err());
        assert!(validate_bus_name("org").is_err());
        assert!(validate_bus_name("org.1foo").is_err());
    }

    #[test]
    fn members() {
        assert!(validate_member("Hello").is_ok());
        assert!(validate_member("Get_Name2").is_ok());
        assert!(validate_member("2Hello").is_err());
        assert!(validate_member("He-llo").is_err());
        assert!(validate_member("").is_err());
    }
}
