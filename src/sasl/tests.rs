use std::sync::Arc;

use sha1::{Digest, Sha1};

use crate::error::{ErrorKind, Result};

use super::{
    Command, IdentityResolver, LineBuffer, Mechanism, SaslClient, SaslOutcome, StaticIdentity,
};

fn client(mechanisms: &[Mechanism]) -> SaslClient {
    SaslClient::new(
        mechanisms.iter().copied(),
        Arc::new(StaticIdentity("1000".into())),
        None,
    )
    .unwrap()
}

#[test]
fn external_happy_path() {
    let mut sasl = client(&[Mechanism::External]);

    let mut out = Vec::new();
    sasl.initial(&mut out).unwrap();
    assert_eq!(out, b"\0AUTH EXTERNAL 31303030\r\n");

    let mut out = Vec::new();
    let outcome = sasl.advance(b"OK 1234deadbeef", &mut out).unwrap();
    assert_eq!(outcome, SaslOutcome::Authenticated);
    assert_eq!(out, b"BEGIN\r\n");
    assert_eq!(sasl.guid(), Some("1234deadbeef"));
}

#[test]
fn rejected_iterates_to_cookie_once() {
    let mut sasl = client(&[Mechanism::External, Mechanism::Cookie]);

    let mut out = Vec::new();
    sasl.initial(&mut out).unwrap();
    assert_eq!(out, b"\0AUTH EXTERNAL 31303030\r\n");

    let mut out = Vec::new();
    let outcome = sasl.advance(b"REJECTED DBUS_COOKIE_SHA1", &mut out).unwrap();
    assert_eq!(outcome, SaslOutcome::Continue);

    // Exactly one transition: a single AUTH line for the cookie mechanism.
    assert_eq!(out, b"AUTH DBUS_COOKIE_SHA1 31303030\r\n");
}

/// A resolver whose UID and user name differ, like any real account.
struct SplitIdentity;

impl IdentityResolver for SplitIdentity {
    fn resolve_authorization_identity(&self) -> Result<String> {
        Ok("1000".into())
    }

    fn resolve_user_name(&self) -> Result<String> {
        Ok("alice".into())
    }
}

#[test]
fn cookie_identifies_by_user_name_not_uid() {
    let mut sasl =
        SaslClient::new([Mechanism::Cookie], Arc::new(SplitIdentity), None).unwrap();

    let mut out = Vec::new();
    sasl.initial(&mut out).unwrap();
    assert_eq!(
        out,
        format!("\0AUTH DBUS_COOKIE_SHA1 {}\r\n", hex::encode(b"alice")).as_bytes()
    );

    let mut sasl =
        SaslClient::new([Mechanism::External], Arc::new(SplitIdentity), None).unwrap();

    let mut out = Vec::new();
    sasl.initial(&mut out).unwrap();
    assert_eq!(out, b"\0AUTH EXTERNAL 31303030\r\n");
}

#[test]
fn all_mechanisms_rejected() {
    let mut sasl = client(&[Mechanism::External]);

    let mut out = Vec::new();
    sasl.initial(&mut out).unwrap();

    let mut out = Vec::new();
    let err = sasl.advance(b"REJECTED ANONYMOUS", &mut out).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::MechanismsExhausted));
    assert!(out.is_empty());
}

#[test]
fn anonymous_sends_trace_token() {
    let mut sasl = client(&[Mechanism::Anonymous]);

    let mut out = Vec::new();
    sasl.initial(&mut out).unwrap();
    assert_eq!(
        out,
        format!("\0AUTH ANONYMOUS {}\r\n", hex::encode(b"steadybus")).as_bytes()
    );
}

#[test]
fn error_reply_cancels_and_moves_on() {
    let mut sasl = client(&[Mechanism::External, Mechanism::Anonymous]);

    let mut out = Vec::new();
    sasl.initial(&mut out).unwrap();

    let mut out = Vec::new();
    sasl.advance(b"ERROR not today", &mut out).unwrap();

    let rendered = String::from_utf8(out).unwrap();
    assert!(rendered.starts_with("CANCEL\r\n"));
    assert!(rendered.contains("AUTH ANONYMOUS"));
}

#[test]
fn agree_unix_fd_is_tolerated() {
    let mut sasl = client(&[Mechanism::External]);

    let mut out = Vec::new();
    sasl.initial(&mut out).unwrap();

    let mut out = Vec::new();
    let outcome = sasl.advance(b"AGREE_UNIX_FD", &mut out).unwrap();
    assert_eq!(outcome, SaslOutcome::Continue);
    assert!(out.is_empty());
}

#[cfg(unix)]
#[test]
fn cookie_challenge_round_trip() {
    let keyring = tempfile::tempdir().unwrap();
    std::fs::write(
        keyring.path().join("org_freedesktop_general"),
        "7 1719400000 616263646566\n42 1719400000 a1b2c3d4e5f6\n",
    )
    .unwrap();

    let mut sasl = SaslClient::new(
        [Mechanism::Cookie],
        Arc::new(StaticIdentity("1000".into())),
        Some(keyring.path().to_path_buf()),
    )
    .unwrap();

    let mut out = Vec::new();
    sasl.initial(&mut out).unwrap();
    assert_eq!(out, b"\0AUTH DBUS_COOKIE_SHA1 31303030\r\n");

    let challenge = hex::encode(b"org_freedesktop_general 42 cafef00d");
    let mut out = Vec::new();
    let outcome = sasl
        .advance(format!("DATA {challenge}").as_bytes(), &mut out)
        .unwrap();
    assert_eq!(outcome, SaslOutcome::Continue);

    // DATA <hex payload> decoding to "<client_challenge_hex> <digest_hex>".
    let line = String::from_utf8(out).unwrap();
    let payload = line
        .strip_prefix("DATA ")
        .and_then(|rest| rest.strip_suffix("\r\n"))
        .unwrap();
    let decoded = String::from_utf8(hex::decode(payload).unwrap()).unwrap();
    let (client_challenge, digest) = decoded.split_once(' ').unwrap();

    assert_eq!(client_challenge.len(), 32);

    let mut expected = Sha1::new();
    expected.update(format!("cafef00d:{client_challenge}:a1b2c3d4e5f6"));
    assert_eq!(digest, hex::encode(expected.finalize()));

    let mut out = Vec::new();
    let outcome = sasl.advance(b"OK 00112233", &mut out).unwrap();
    assert_eq!(outcome, SaslOutcome::Authenticated);
    assert_eq!(out, b"BEGIN\r\n");
}

#[test]
fn cookie_context_traversal_rejected() {
    let keyring = tempfile::tempdir().unwrap();

    for context in ["../secrets", "/etc/passwd", "a.b", "a\\b"] {
        let mut sasl = SaslClient::new(
            [Mechanism::Cookie],
            Arc::new(StaticIdentity("1000".into())),
            Some(keyring.path().to_path_buf()),
        )
        .unwrap();

        let mut out = Vec::new();
        sasl.initial(&mut out).unwrap();

        let challenge = hex::encode(format!("{context} 42 cafef00d"));
        let mut out = Vec::new();
        let err = sasl
            .advance(format!("DATA {challenge}").as_bytes(), &mut out)
            .unwrap_err();

        // The shape check fires before any filesystem access.
        assert!(
            matches!(err.kind(), ErrorKind::InvalidCookieContext(..)),
            "context {context:?} produced {err:?}"
        );
    }
}

#[test]
fn command_grammar() {
    assert_eq!(
        Command::parse(b"REJECTED EXTERNAL DBUS_COOKIE_SHA1").unwrap(),
        Command::Rejected(vec![Mechanism::External, Mechanism::Cookie])
    );
    // Unknown mechanisms in a REJECTED list are skipped.
    assert_eq!(
        Command::parse(b"REJECTED KERBEROS_V4 ANONYMOUS").unwrap(),
        Command::Rejected(vec![Mechanism::Anonymous])
    );
    assert_eq!(
        Command::parse(b"OK deadbeef").unwrap(),
        Command::Ok("deadbeef".into())
    );
    assert_eq!(
        Command::parse(b"DATA 616263").unwrap(),
        Command::Data(b"abc".to_vec())
    );
    assert_eq!(
        Command::parse(b"ERROR no luck").unwrap(),
        Command::Error("no luck".into())
    );
    assert!(Command::parse(b"OK").is_err());
    assert!(Command::parse(b"BOGUS").is_err());
    assert!(Command::parse(b"DATA zz").is_err());

    assert_eq!(
        Command::Auth(Some(Mechanism::External), Some(b"1000".to_vec())).to_line(),
        b"AUTH EXTERNAL 31303030\r\n"
    );
}

#[test]
fn line_buffer_splits_crlf() {
    let mut lines = LineBuffer::new();
    lines.extend(b"OK dead");
    assert!(lines.next_line().unwrap().is_none());

    lines.extend(b"beef\r\nl\x01\x02");
    assert_eq!(lines.next_line().unwrap().unwrap(), b"OK deadbeef");
    assert!(lines.next_line().unwrap().is_none());
    assert_eq!(lines.take_remainder(), b"l\x01\x02");
}

#[test]
fn line_buffer_rejects_bare_newline() {
    let mut lines = LineBuffer::new();
    lines.extend(b"OK deadbeef\n");
    assert!(lines.next_line().is_err());
}
