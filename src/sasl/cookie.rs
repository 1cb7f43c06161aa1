//! The DBUS_COOKIE_SHA1 challenge/response.
//!
//! The server names a cookie in the user's keyring directory
//! (`~/.dbus-keyrings/<context>`) and challenges the client to prove it can
//! read it.

use std::path::{Path, PathBuf};

use rand::Rng;
use sha1::{Digest, Sha1};

use crate::error::{Error, ErrorKind, Result};

/// Compute the response to a server `DATA` challenge.
///
/// The payload is ASCII `"<context> <cookie_id> <server_challenge_hex>"`;
/// the response is `"<client_challenge_hex> <sha1_hex>"` where the digest
/// covers `server_challenge:client_challenge:cookie_secret`.
pub(super) fn respond(payload: &[u8], keyring_override: Option<&Path>) -> Result<Vec<u8>> {
    let payload = std::str::from_utf8(payload)
        .map_err(|_| unavailable("challenge was not valid UTF-8"))?;

    let mut words = payload.split_ascii_whitespace();

    let context = words
        .next()
        .ok_or_else(|| unavailable("missing cookie context"))?;
    let id = words
        .next()
        .ok_or_else(|| unavailable("missing cookie ID"))?;
    let server_challenge = words
        .next()
        .ok_or_else(|| unavailable("missing server challenge"))?;

    validate_context(context)?;

    let id: u64 = id
        .parse()
        .map_err(|_| unavailable("cookie ID is not a number"))?;

    let secret = lookup_cookie(context, id, keyring_override)?;

    let client_challenge = hex::encode(rand::thread_rng().gen::<[u8; 16]>());

    let mut digest = Sha1::new();
    digest.update(server_challenge.as_bytes());
    digest.update(b":");
    digest.update(client_challenge.as_bytes());
    digest.update(b":");
    digest.update(secret.as_bytes());

    let mut response = client_challenge.into_bytes();
    response.push(b' ');
    response.extend_from_slice(hex::encode(digest.finalize()).as_bytes());
    Ok(response)
}

/// Reject contexts that could escape the keyring directory before touching
/// the filesystem.
fn validate_context(context: &str) -> Result<()> {
    let bad = context.is_empty()
        || !context.is_ascii()
        || context
            .bytes()
            .any(|b| matches!(b, b'/' | b'\\' | b'.' | b' ') || b.is_ascii_control());

    if bad {
        return Err(Error::new(ErrorKind::InvalidCookieContext(context.into())));
    }

    Ok(())
}

fn keyring_dir(keyring_override: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = keyring_override {
        return Ok(dir.to_path_buf());
    }

    let home = std::env::var_os("HOME").ok_or_else(|| unavailable("HOME is not set"))?;

    let mut dir = PathBuf::from(home);
    dir.push(".dbus-keyrings");
    Ok(dir)
}

fn lookup_cookie(context: &str, id: u64, keyring_override: Option<&Path>) -> Result<String> {
    let dir = keyring_dir(keyring_override)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mode = std::fs::metadata(&dir)
            .map_err(|_| unavailable("keyring directory is missing"))?
            .permissions()
            .mode();

        if mode & 0o066 != 0 {
            return Err(unavailable("keyring directory has lax permissions"));
        }
    }

    let path = dir.join(context);
    let contents =
        std::fs::read_to_string(&path).map_err(|_| unavailable("cookie file is unreadable"))?;

    for line in contents.lines() {
        let mut words = line.split_ascii_whitespace();

        let Some(line_id) = words.next().and_then(|word| word.parse::<u64>().ok()) else {
            continue;
        };

        // The second word is the creation timestamp, which we don't check.
        let _created = words.next();

        if line_id != id {
            continue;
        }

        let Some(secret) = words.next() else {
            continue;
        };

        return Ok(secret.to_owned());
    }

    Err(unavailable("cookie ID not present in keyring"))
}

fn unavailable(reason: &str) -> Error {
    Error::new(ErrorKind::CookieUnavailable(reason.into()))
}
