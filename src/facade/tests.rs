//! Unit tests for the facade client and job polling.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rstest::{fixture, rstest};
use serde_json::json;
use tokio::time::Instant;

use super::*;
use crate::model::Secret;
use crate::test_support::{ScriptedTransport, TestRig};

fn seconds(retries: u32) -> PollPolicy {
    PollPolicy {
        retries,
        unit: Duration::from_secs(1),
        max_delay: Duration::from_secs(60),
    }
}

async fn poll_script(
    policy: PollPolicy,
    script: Vec<JobStatus<()>>,
    cleanups: &AtomicU32,
) -> Result<(), FacadeError> {
    let mut answers = VecDeque::from(script);
    poll_until(
        "job",
        policy,
        move || {
            let next = answers.pop_front().unwrap_or(JobStatus::Pending);
            async move { Ok(next) }
        },
        || async move {
            cleanups.fetch_add(1, Ordering::SeqCst);
        },
    )
    .await
}

struct Client {
    client: FacadeClient,
    transport: ScriptedTransport,
}

#[fixture]
fn client() -> Client {
    let transport = ScriptedTransport::new();
    let policies = FacadePolicies::new(Duration::from_secs(1), Duration::from_secs(60), 5, 2, 3);
    Client {
        client: FacadeClient::new(Arc::new(transport.clone()), policies),
        transport,
    }
}

#[rstest]
#[case(1, 5)]
#[case(2, 12)]
#[case(3, 19)]
#[case(9, 60)]
fn delay_grows_linearly_up_to_the_cap(#[case] attempt: u32, #[case] expected_secs: u64) {
    assert_eq!(seconds(5).delay(attempt), Duration::from_secs(expected_secs));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn poll_sleeps_between_pending_answers() {
    let cleanups = AtomicU32::new(0);
    let started = Instant::now();
    let script = vec![JobStatus::Pending, JobStatus::Pending, JobStatus::Done(())];

    poll_script(seconds(5), script, &cleanups)
        .await
        .unwrap_or_else(|err| panic!("job should finish: {err}"));

    assert_eq!(started.elapsed(), Duration::from_secs(17));
    assert_eq!(cleanups.load(Ordering::SeqCst), 0);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn poll_cleans_up_once_after_the_final_pending_answer() {
    let cleanups = AtomicU32::new(0);
    let started = Instant::now();

    let err = poll_script(seconds(5), Vec::new(), &cleanups)
        .await
        .expect_err("job should time out");

    assert_eq!(
        err,
        FacadeError::Timeout {
            label: String::from("job"),
            attempts: 5,
        }
    );
    assert_eq!(started.elapsed(), Duration::from_secs(62));
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn poll_returns_failures_without_sleeping() {
    let cleanups = AtomicU32::new(0);
    let started = Instant::now();
    let script = vec![JobStatus::Failed {
        code: 409,
        message: String::from("busy"),
    }];

    let err = poll_script(seconds(5), script, &cleanups)
        .await
        .expect_err("job should fail");

    assert_eq!(
        err,
        FacadeError::Remote {
            code: 409,
            message: String::from("busy"),
        }
    );
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(cleanups.load(Ordering::SeqCst), 0);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn zero_retries_still_polls_once() {
    let cleanups = AtomicU32::new(0);

    poll_script(seconds(0), vec![JobStatus::Done(())], &cleanups)
        .await
        .unwrap_or_else(|err| panic!("single poll should succeed: {err}"));
}

#[rstest]
#[case(200, json!({ "alive": true }), Ok(JobStatus::Pending))]
#[case(200, json!({ "alive": false, "code": 0 }), Ok(JobStatus::Done(())))]
#[case(
    200,
    json!({ "alive": false, "code": 3 }),
    Ok(JobStatus::Failed { code: 3, message: String::from("play 7 exited with code 3") })
)]
#[case(
    404,
    json!({ "message": "no such play" }),
    Ok(JobStatus::Failed { code: 404, message: String::from("no such play") })
)]
#[tokio::test]
async fn play_status_maps_facade_answers(
    client: Client,
    #[case] status: u16,
    #[case] body: serde_json::Value,
    #[case] expected: Result<JobStatus<()>, FacadeError>,
) {
    client
        .transport
        .push_response(Method::Get, "/api/v2/plays/7", status, body);

    let actual = client.client.play_status(&TestRig::ctx(), "7").await;

    assert_eq!(actual, expected);
}

#[rstest]
#[tokio::test]
async fn play_status_rejects_bodies_without_alive_or_code(client: Client) {
    client
        .transport
        .push_response(Method::Get, "/api/v2/plays/7", 200, json!({}));

    let err = client
        .client
        .play_status(&TestRig::ctx(), "7")
        .await
        .expect_err("body should be rejected");

    assert!(matches!(err, FacadeError::Decode { .. }), "got {err:?}");
}

#[rstest]
#[tokio::test]
async fn requests_carry_the_caller_token(client: Client) {
    client
        .client
        .list_servers(&TestRig::ctx())
        .await
        .unwrap_or_else(|err| panic!("listing should succeed: {err}"));

    let requests = client.transport.requests();
    let Some(first) = requests.first() else {
        panic!("no request recorded");
    };
    assert_eq!(first.token, Some(Secret::new("token-123")));
    assert_eq!(first.line(), "GET /api/v2/model/entities/servers");
}

#[rstest]
#[tokio::test]
async fn duplicate_servers_surface_the_remote_message(client: Client) {
    let ctx = TestRig::ctx();
    let entry = ServerEntry {
        id: String::from("kvm-1"),
        ip_addr: String::from("10.0.0.5"),
        role: String::from("KVM-COMPUTE-ROLE"),
        ..ServerEntry::default()
    };
    client
        .client
        .add_server(&ctx, &entry)
        .await
        .unwrap_or_else(|err| panic!("first add should succeed: {err}"));

    let err = client
        .client
        .add_server(&ctx, &entry)
        .await
        .expect_err("second add should conflict");

    assert_eq!(
        err,
        FacadeError::Remote {
            code: 409,
            message: String::from("server kvm-1 exists"),
        }
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn stuck_playbooks_are_killed(client: Client) {
    for _ in 0..2 {
        client.transport.push_response(
            Method::Get,
            "/api/v2/plays/site",
            200,
            json!({ "alive": true }),
        );
    }

    let err = client
        .client
        .run_playbook(&TestRig::ctx(), types::SITE, &PlaybookRun::limited_to("kvm-1"))
        .await
        .expect_err("play should time out");

    assert!(matches!(err, FacadeError::Timeout { attempts: 2, .. }), "got {err:?}");
    let lines = client.transport.lines();
    assert_eq!(
        lines,
        vec![
            String::from("POST /api/v2/playbooks/site"),
            String::from("GET /api/v2/plays/site"),
            String::from("GET /api/v2/plays/site"),
            String::from("DELETE /api/v2/plays/site"),
        ]
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn ready_deployment_uses_the_quick_budget(client: Client) {
    for _ in 0..10 {
        client.transport.push_response(
            Method::Get,
            "/api/v2/plays/ready_deployment",
            200,
            json!({ "alive": true }),
        );
    }

    let err = client
        .client
        .run_playbook(
            &TestRig::ctx(),
            types::READY_DEPLOYMENT,
            &PlaybookRun::everywhere(),
        )
        .await
        .expect_err("play should time out");

    assert!(matches!(err, FacadeError::Timeout { attempts: 5, .. }), "got {err:?}");
}

#[rstest]
#[tokio::test]
async fn os_installs_finish_when_the_server_completes(client: Client) {
    client
        .client
        .install_os(
            &TestRig::ctx(),
            OsInstallTarget {
                id: String::from("node-1"),
                os_version: Some(String::from("rhel75")),
            },
        )
        .await
        .unwrap_or_else(|err| panic!("install should finish: {err}"));

    let requests = client.transport.requests();
    let Some(start) = requests.first() else {
        panic!("no request recorded");
    };
    assert_eq!(
        start.body,
        Some(json!({ "servers": [{ "id": "node-1", "os-version": "rhel75" }] }))
    );
}
