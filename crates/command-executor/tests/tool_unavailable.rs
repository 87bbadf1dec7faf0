//! Backends whose tool is missing fail before creating anything

mod common;

use command_executor::{
    AttachMode, Backend, EnvironmentDriver, Error, IsolationLevel, LevelOption, RunOptions,
};
use common::{NothingInstalled, run_level_with, sh};

#[smol_potat::test]
async fn test_missing_tools_are_reported() {
    let cases = [
        (Backend::Screen, IsolationLevel::new(Backend::Screen), "screen"),
        (Backend::Tmux, IsolationLevel::new(Backend::Tmux), "tmux"),
        (Backend::Docker, IsolationLevel::new(Backend::Docker), "docker"),
        (
            Backend::Ssh,
            IsolationLevel::new(Backend::Ssh).with(LevelOption::Endpoint, "me@example.invalid"),
            "ssh",
        ),
    ];

    for mode in [AttachMode::Attached, AttachMode::Detached] {
        let options = RunOptions {
            mode,
            ..RunOptions::default()
        };
        for (backend, level, binary) in &cases {
            let run = run_level_with(
                &EnvironmentDriver::for_backend(*backend),
                sh("echo hi"),
                level,
                &options,
                &NothingInstalled,
            )
            .await;

            match run.outcome {
                Err(Error::ToolUnavailable { binary: b, hint }) => {
                    assert_eq!(b, *binary);
                    assert!(!hint.is_empty());
                }
                other => panic!("expected ToolUnavailable for {}, got {:?}", backend, other),
            }
            assert!(run.output.is_empty());
            assert!(run.ledger.snapshot().is_empty());
        }
    }
}

#[smol_potat::test]
async fn test_local_detached_is_rejected() {
    let options = RunOptions {
        mode: AttachMode::Detached,
        ..RunOptions::default()
    };
    let run = run_level_with(
        &EnvironmentDriver::for_backend(Backend::Local),
        sh("echo hi"),
        &IsolationLevel::new(Backend::Local),
        &options,
        &NothingInstalled,
    )
    .await;
    assert!(run.outcome.is_err_and(|e| e.is_configuration()));
    assert!(run.output.is_empty());
}
