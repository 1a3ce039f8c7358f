// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::model::Target;

fn pm_and_agent() -> (Target, Target) {
    (Target::new("dev", 0).unwrap(), Target::new("dev", 2).unwrap())
}

#[tokio::test]
async fn capture_returns_seeded_content() {
    let term = FakeTerminal::new();
    let (_, agent) = pm_and_agent();
    term.add_session("dev", vec![WindowMeta { index: 0, name: "pm".into() }, WindowMeta { index: 2, name: "agent".into() }]);
    term.set_content(&agent, vec!["line1".into(), "line2".into(), "line3".into()]);

    let captured = term.capture(&agent, 2).await.unwrap();
    assert_eq!(captured, "line2\nline3");
}

#[tokio::test]
async fn capture_unknown_target_is_target_not_found() {
    let term = FakeTerminal::new();
    let missing = Target::new("ghost", 9).unwrap();
    let err = term.capture(&missing, 10).await.unwrap_err();
    assert_eq!(err, TerminalError::TargetNotFound(missing));
}

#[tokio::test]
async fn send_and_press_key_are_recorded() {
    let term = FakeTerminal::new();
    let (_, agent) = pm_and_agent();
    term.add_session("dev", vec![WindowMeta { index: 2, name: "agent".into() }]);

    term.press_key(&agent, Key::CtrlU).await.unwrap();
    term.send(&agent, "📨 hello").await.unwrap();
    term.press_key(&agent, Key::Enter).await.unwrap();

    assert_eq!(term.sent_to(&agent), vec!["📨 hello".to_string()]);
    assert_eq!(term.keys_pressed(&agent), vec![Key::CtrlU, Key::Enter]);
}

#[tokio::test]
async fn list_windows_unknown_session_is_transport_error() {
    let term = FakeTerminal::new();
    let err = term.list_windows("nope").await.unwrap_err();
    assert!(matches!(err, TerminalError::Transport(_)));
}
