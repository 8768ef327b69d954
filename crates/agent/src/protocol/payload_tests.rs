// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use bytes::Bytes;

use super::*;
use crate::protocol::CodecError;

#[test]
fn version_negotiation_round_trip() -> anyhow::Result<()> {
    let p = VersionNegotiation {
        client_version: 1,
        min_version: 1,
        max_version: 2,
        client_id: "mobile-a81f".to_owned(),
    };
    assert_eq!(VersionNegotiation::decode(&p.encode())?, p);
    Ok(())
}

#[test]
fn version_response_rejection_round_trip() -> anyhow::Result<()> {
    let p = VersionResponse {
        selected_version: 0,
        server_version: "0.7.2".to_owned(),
        accepted: false,
        rejection_reason: "client too old".to_owned(),
    };
    assert_eq!(VersionResponse::decode(&p.encode())?, p);
    Ok(())
}

#[test]
fn capability_lists_round_trip() -> anyhow::Result<()> {
    let req = CapabilityExchange {
        capabilities: vec!["state-sync".to_owned(), "scrollback-replay".to_owned()],
    };
    assert_eq!(CapabilityExchange::decode(&req.encode())?, req);

    let resp = CapabilityResponse { granted: vec!["state-sync".to_owned()] };
    assert_eq!(CapabilityResponse::decode(&resp.encode())?, resp);
    Ok(())
}

#[test]
fn heartbeat_is_twenty_bytes() -> anyhow::Result<()> {
    let p = Heartbeat { seq: 12345, timestamp_ms: 1_700_000_000_000, pending_acks: 3 };
    let encoded = p.encode();
    assert_eq!(encoded.len(), 20);
    assert_eq!(Heartbeat::decode(&encoded)?, p);
    Ok(())
}

#[test]
fn error_payload_round_trip() -> anyhow::Result<()> {
    let p = ErrorPayload {
        code: "SESSION_LIMIT".to_owned(),
        message: "connection holds 2 of 2 sessions".to_owned(),
        fatal: false,
    };
    assert_eq!(ErrorPayload::decode(&p.encode())?, p);
    Ok(())
}

#[test]
fn session_create_with_env_round_trip() -> anyhow::Result<()> {
    let p = SessionCreate {
        shell: "/bin/zsh".to_owned(),
        cols: 120,
        rows: 40,
        working_dir: "/home/dev/project".to_owned(),
        env: vec![("EDITOR".to_owned(), "vim".to_owned()), ("PAGER".to_owned(), "less".to_owned())],
    };
    assert_eq!(SessionCreate::decode(&p.encode())?, p);
    Ok(())
}

#[test]
fn session_attach_optional_sequence() -> anyhow::Result<()> {
    let with = SessionAttach { session_id: "s-1".to_owned(), last_sequence: Some(42) };
    assert_eq!(SessionAttach::decode(&with.encode())?, with);

    let without = SessionAttach { session_id: "s-1".to_owned(), last_sequence: None };
    assert_eq!(SessionAttach::decode(&without.encode())?, without);
    Ok(())
}

#[test]
fn session_closed_optional_exit_code() -> anyhow::Result<()> {
    let clean = SessionClosed {
        session_id: "s-1".to_owned(),
        exit_code: Some(0),
        reason: "process exited".to_owned(),
    };
    assert_eq!(SessionClosed::decode(&clean.encode())?, clean);

    let killed = SessionClosed {
        session_id: "s-2".to_owned(),
        exit_code: None,
        reason: "window expired".to_owned(),
    };
    assert_eq!(SessionClosed::decode(&killed.encode())?, killed);
    Ok(())
}

#[test]
fn session_list_response_round_trip() -> anyhow::Result<()> {
    let p = SessionListResponse {
        sessions: vec![
            SessionSummary {
                id: "s-1".to_owned(),
                state: "ACTIVE".to_owned(),
                wire_id: 1,
                created_at_ms: 1_700_000_000_000,
                last_activity_ms: 1_700_000_060_000,
                cols: 80,
                rows: 24,
            },
            SessionSummary {
                id: "s-2".to_owned(),
                state: "DETACHED".to_owned(),
                wire_id: 2,
                created_at_ms: 1_700_000_030_000,
                last_activity_ms: 1_700_000_030_000,
                cols: 120,
                rows: 40,
            },
        ],
    };
    assert_eq!(SessionListResponse::decode(&p.encode())?, p);
    Ok(())
}

#[test]
fn output_round_trip() -> anyhow::Result<()> {
    let p = Output {
        sequence: 9,
        timestamp_ms: 1_700_000_000_123,
        compression: 1,
        data: Bytes::from_static(b"\x1b[32mok\x1b[0m"),
    };
    assert_eq!(Output::decode(&p.encode())?, p);
    Ok(())
}

#[test]
fn state_snapshot_round_trip() -> anyhow::Result<()> {
    let p = StateSnapshot {
        cols: 80,
        rows: 24,
        cursor_x: 12,
        cursor_y: 3,
        cursor_visible: true,
        screen: Bytes::from_static(b"$ ls\nsrc tests\n"),
        scrollback_offset: 0,
        scrollback_total: 1024,
        fg_color: 0x00ff_ffff,
        bg_color: 0,
        attributes: 0,
        sequence: 77,
    };
    assert_eq!(StateSnapshot::decode(&p.encode())?, p);
    Ok(())
}

#[yare::parameterized(
    truncated_mid_int    = { &[0u8, 0, 0][..] },
    truncated_mid_string = { &[0u8, 0, 0, 5, b'a', b'b'][..] },
    empty                = { &[][..] },
)]
fn truncated_payloads_fail(buf: &[u8]) {
    assert_eq!(SessionRef::decode(buf), Err(CodecError::TruncatedPayload));
}

#[test]
fn trailing_bytes_rejected() {
    let mut buf = SessionRef { session_id: "s-1".to_owned() }.encode().to_vec();
    buf.push(0);
    assert_eq!(SessionRef::decode(&buf), Err(CodecError::TruncatedPayload));
}

#[test]
fn non_utf8_string_rejected() {
    // length-4 string with an invalid continuation byte
    let buf = [0u8, 0, 0, 4, 0xff, 0xfe, b'a', b'b'];
    assert_eq!(SessionRef::decode(&buf), Err(CodecError::InvalidUtf8));
}
