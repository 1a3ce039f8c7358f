// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::model::Target;

#[test]
fn pane_id_joins_session_and_window() {
    let target = Target::new("dev", 2).unwrap();
    assert_eq!(TmuxTerminal::pane_id(&target), "dev:2");
}

#[test]
fn classify_target_error_recognizes_missing_session() {
    let target = Target::new("dev", 2).unwrap();
    let err = TmuxTerminal::classify_target_error("can't find session dev", &target);
    assert_eq!(err, TerminalError::TargetNotFound(target));
}

#[test]
fn classify_target_error_falls_back_to_transport() {
    let target = Target::new("dev", 2).unwrap();
    let err = TmuxTerminal::classify_target_error("server exited unexpectedly", &target);
    assert!(matches!(err, TerminalError::Transport(_)));
}
