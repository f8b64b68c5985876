//! Tests for SSH command construction and failure mapping.

use rstest::{fixture, rstest};

use super::*;
use crate::test_support::ScriptedRunner;

#[fixture]
fn config() -> ShellConfig {
    ShellConfig {
        ssh_bin: String::from("ssh"),
        sshpass_bin: String::from("sshpass"),
        ssh_strict_host_key_checking: false,
        ssh_known_hosts_file: String::from("/dev/null"),
        connect_timeout_secs: 7,
    }
}

fn target(username: &str, flavor: ShellFlavor) -> ShellTarget {
    ShellTarget {
        host: String::from("10.0.0.9"),
        port: Some(2222),
        username: username.to_owned(),
        password: Secret::new("s3cr3t"),
        flavor,
    }
}

fn last_arg(runner: &ScriptedRunner) -> String {
    let invocation = runner
        .invocations()
        .pop()
        .unwrap_or_else(|| panic!("runner was not invoked"));
    invocation
        .args
        .last()
        .map(|arg| arg.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[rstest]
#[tokio::test]
async fn non_root_posix_commands_use_sudo(config: ShellConfig) {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(0), "ok\n", "");
    let connector = SshConnector::new(config, runner.clone());
    let shell = connector.connect(&target("stack", ShellFlavor::Posix));

    let stdout = shell
        .run("virsh list --all --name")
        .await
        .unwrap_or_else(|err| panic!("run: {err}"));

    assert_eq!(stdout, "ok");
    assert_eq!(last_arg(&runner), "sudo -n sh -c 'virsh list --all --name'");
    let invocation = runner
        .invocations()
        .pop()
        .unwrap_or_else(|| panic!("runner was not invoked"));
    assert_eq!(invocation.program, "sshpass");
    let rendered = invocation.command_string();
    assert!(rendered.contains("ssh -p 2222"), "args: {rendered}");
    assert!(rendered.contains("ConnectTimeout=7"), "args: {rendered}");
    assert!(rendered.contains("stack@10.0.0.9"), "args: {rendered}");
}

#[rstest]
#[tokio::test]
async fn passwords_travel_in_the_environment(config: ShellConfig) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let connector = SshConnector::new(config, runner.clone());
    let shell = connector.connect(&target("root", ShellFlavor::Posix));

    shell
        .open()
        .await
        .unwrap_or_else(|err| panic!("open: {err}"));

    let invocation = runner
        .invocations()
        .pop()
        .unwrap_or_else(|| panic!("runner was not invoked"));
    assert_eq!(invocation.args.first(), Some(&OsString::from("-e")));
    let rendered = invocation.command_string();
    assert!(!rendered.contains("s3cr3t"), "args leak password: {rendered}");
    assert_eq!(
        invocation.envs,
        vec![(OsString::from(SSHPASS_ENV), OsString::from("s3cr3t"))]
    );
}

#[rstest]
#[case::root("root", ShellFlavor::Posix, "cat /etc/os-release")]
#[case::powershell(
    "Administrator",
    ShellFlavor::PowerShell,
    "powershell -NoProfile -NonInteractive -Command 'cat /etc/os-release'"
)]
#[tokio::test]
async fn commands_are_wrapped_per_flavor(
    config: ShellConfig,
    #[case] user: &str,
    #[case] flavor: ShellFlavor,
    #[case] expected: &str,
) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let connector = SshConnector::new(config, runner.clone());
    let shell = connector.connect(&target(user, flavor));

    shell
        .exec("cat /etc/os-release")
        .await
        .unwrap_or_else(|err| panic!("exec: {err}"));

    assert_eq!(last_arg(&runner), expected);
}

#[rstest]
#[tokio::test]
async fn ssh_failures_map_to_connection_errors(config: ShellConfig) {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(255), "", "Permission denied for s3cr3t");
    let connector = SshConnector::new(config, runner);
    let shell = connector.connect(&target("root", ShellFlavor::Posix));

    let err = shell.open().await.expect_err("login should fail");

    let ShellError::Connection { host, message } = err else {
        panic!("expected connection error, got {err:?}");
    };
    assert_eq!(host, "10.0.0.9");
    assert!(!message.contains("s3cr3t"), "message leaks password: {message}");
}

#[rstest]
#[tokio::test]
async fn failed_commands_report_status(config: ShellConfig) {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(1), "", "no such command");
    let connector = SshConnector::new(config, runner);
    let shell = connector.connect(&target("root", ShellFlavor::Posix));

    let err = shell.run("virsh list").await.expect_err("command fails");

    assert_eq!(
        err,
        ShellError::CommandFailed {
            host: String::from("10.0.0.9"),
            command: String::from("virsh list"),
            code: Some(1),
            stderr: String::from("no such command"),
        }
    );
}

#[test]
fn mask_hides_every_occurrence() {
    let secret = Secret::new("pw");
    assert_eq!(mask("a pw b pw", &secret), "a ****** b ******");
    assert_eq!(mask("unchanged", &Secret::default()), "unchanged");
}
