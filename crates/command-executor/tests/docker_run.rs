//! Docker containers against a real daemon
//!
//! Run with `cargo test -p command-executor --features docker-tests`.

#![cfg(feature = "docker-tests")]

mod common;

use command_executor::{
    AttachMode, Backend, EnvironmentDriver, IsolationLevel, Janitor, LevelOption, RunOptions,
};
use common::run_level;

fn posix(script: &str) -> command_executor::Command {
    command_executor::Shell::posix().command(script)
}

#[smol_potat::test]
async fn test_attached_container_streams_and_exits() {
    let run = run_level(
        &EnvironmentDriver::for_backend(Backend::Docker),
        posix("echo from-container; echo oops >&2; exit 4"),
        &IsolationLevel::new(Backend::Docker).with(LevelOption::Image, "alpine:latest"),
        &RunOptions::default(),
    )
    .await;

    let outcome = run.outcome.unwrap();
    assert_eq!(outcome.exit_code, 4);
    assert!(run.output.contains("from-container"));
    assert!(run.output.contains("oops"));
    assert!(run.ledger.snapshot().is_empty());
}

#[smol_potat::test]
async fn test_detached_container_reports_name() {
    let name = format!("docker-itest-{}", std::process::id());
    let options = RunOptions {
        mode: AttachMode::Detached,
        ..RunOptions::default()
    };
    let run = run_level(
        &EnvironmentDriver::for_backend(Backend::Docker),
        posix("sleep 30"),
        &IsolationLevel::new(Backend::Docker)
            .with(LevelOption::Image, "alpine:latest")
            .with(LevelOption::Session, name.clone()),
        &options,
    )
    .await;

    let outcome = run.outcome.unwrap();
    assert!(outcome.success);
    assert!(outcome.message.contains(&format!("docker attach {}", name)));

    Janitor
        .teardown(&outcome.resource.unwrap())
        .await
        .unwrap();
}
