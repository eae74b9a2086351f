use std::{
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use httpmock::prelude::*;
use relay_config::{
    save_runtime_profile, RuntimeCache, RuntimeCacheOptions, RuntimeProfile,
    RuntimeProfileOverrides,
};
use relay_http::HttpCallExecutor;
use relay_runtime::{
    serve_rpc_session, RpcSessionCollaborators, RpcSessionConfig, RpcSessionEnd,
    RPC_CODE_CANCELLED,
};
use serde_json::{json, Value};
use tempfile::tempdir;
use tokio::io::{AsyncWriteExt, BufReader, DuplexStream};

fn write_profile(path: &Path, base_url: &str) {
    save_runtime_profile(
        path,
        &RuntimeProfile {
            base_url: Some(base_url.to_string()),
            max_retries: 0,
            ..RuntimeProfile::default()
        },
    )
    .expect("save profile");
}

fn http_collaborators(profile_path: &Path) -> RpcSessionCollaborators {
    let cache = Arc::new(RuntimeCache::new(RuntimeCacheOptions {
        profile_path: profile_path.to_path_buf(),
        overrides: RuntimeProfileOverrides::default(),
    }));
    let executor = HttpCallExecutor::new(Arc::clone(&cache)).expect("executor");
    RpcSessionCollaborators {
        executor: Arc::new(executor),
        runtime_cache: cache,
    }
}

fn session_config(workers: usize, queue_size: usize) -> RpcSessionConfig {
    RpcSessionConfig {
        workers,
        queue_size,
        default_call_timeout_ms: 10_000,
        ..RpcSessionConfig::default()
    }
}

fn parse_responses(raw: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(raw)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str::<Value>(line).expect("response json"))
        .collect()
}

fn response_with_id<'a>(responses: &'a [Value], id: &Value) -> &'a Value {
    responses
        .iter()
        .find(|response| response.get("id") == Some(id))
        .expect("response for id")
}

async fn send_line(client: &mut DuplexStream, line: Value) {
    let mut raw = line.to_string();
    raw.push('\n');
    client.write_all(raw.as_bytes()).await.expect("write line");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn integration_worker_pool_runs_slow_http_calls_in_parallel() {
    let server = MockServer::start();
    let slow = server.mock(|when, then| {
        when.method(GET).path("/slow");
        then.status(200)
            .delay(Duration::from_millis(400))
            .json_body(json!({"ok": true}));
    });
    let temp = tempdir().expect("tempdir");
    let profile_path = temp.path().join("config.json");
    write_profile(&profile_path, &server.base_url());

    let input = (0..3)
        .map(|index| {
            format!("{{\"id\":{index},\"op\":\"call\",\"args\":{{\"path\":\"/slow\"}}}}\n")
        })
        .collect::<String>();
    let mut output = Vec::new();
    let started = Instant::now();
    let report = serve_rpc_session(
        BufReader::new(input.as_bytes()),
        &mut output,
        session_config(3, 3),
        http_collaborators(&profile_path),
    )
    .await
    .expect("session succeeds");
    let elapsed = started.elapsed();

    slow.assert_calls(3);
    assert_eq!(report.accepted_requests, 3);
    let responses = parse_responses(&output);
    assert_eq!(responses.len(), 3);
    assert!(responses.iter().all(|response| response["ok"] == true));
    assert!(
        elapsed < Duration::from_millis(1_100),
        "calls did not overlap: {elapsed:?}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn integration_cancel_stops_waiting_on_slow_upstream() {
    let server = MockServer::start();
    let hang = server.mock(|when, then| {
        when.method(GET).path("/hang");
        then.status(200).delay(Duration::from_secs(5)).body("late");
    });
    let temp = tempdir().expect("tempdir");
    let profile_path = temp.path().join("config.json");
    write_profile(&profile_path, &server.base_url());

    let (mut client, server_side) = tokio::io::duplex(4096);
    let mut output = Vec::new();
    let driver = async move {
        send_line(
            &mut client,
            json!({"id": "job", "op": "call", "args": {"path": "/hang"}}),
        )
        .await;
        let deadline = Instant::now() + Duration::from_secs(3);
        while hang.calls_async().await == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        send_line(
            &mut client,
            json!({"id": "stop", "op": "cancel", "args": {"id": "job"}}),
        )
        .await;
        drop(client);
    };

    let started = Instant::now();
    let (report, ()) = tokio::join!(
        serve_rpc_session(
            BufReader::new(server_side),
            &mut output,
            session_config(2, 2),
            http_collaborators(&profile_path),
        ),
        driver
    );
    let report = report.expect("session succeeds");
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(report.end, RpcSessionEnd::Eof);

    let responses = parse_responses(&output);
    assert_eq!(responses.len(), 2);
    let stop = response_with_id(&responses, &json!("stop"));
    assert_eq!(stop["data"], json!({"id": "job", "cancelled": true}));
    let job = response_with_id(&responses, &json!("job"));
    assert_eq!(job["ok"], false);
    assert_eq!(job["code"], RPC_CODE_CANCELLED);
    assert_eq!(job["data"]["cancelled"], true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn integration_reload_config_picks_up_profile_edits_mid_session() {
    let first = MockServer::start();
    let first_who = first.mock(|when, then| {
        when.method(GET).path("/who");
        then.status(200).json_body(json!({"server": "first"}));
    });
    let second = MockServer::start();
    let second_who = second.mock(|when, then| {
        when.method(GET).path("/who");
        then.status(200).json_body(json!({"server": "second"}));
    });
    let temp = tempdir().expect("tempdir");
    let profile_path = temp.path().join("config.json");
    write_profile(&profile_path, &first.base_url());

    let (mut client, server_side) = tokio::io::duplex(4096);
    let mut output = Vec::new();
    let driver = {
        let profile_path = profile_path.clone();
        let second_base_url = second.base_url();
        async move {
            send_line(&mut client, json!({"id": "a", "op": "call", "args": {"path": "/who"}}))
                .await;
            let deadline = Instant::now() + Duration::from_secs(3);
            while first_who.calls_async().await == 0 && Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            write_profile(&profile_path, &second_base_url);
            send_line(&mut client, json!({"id": "r", "op": "reload_config"})).await;
            send_line(&mut client, json!({"id": "b", "op": "call", "args": {"path": "/who"}}))
                .await;
            send_line(&mut client, json!({"id": "z", "op": "shutdown"})).await;
        }
    };

    let (report, ()) = tokio::join!(
        serve_rpc_session(
            BufReader::new(server_side),
            &mut output,
            session_config(1, 4),
            http_collaborators(&profile_path),
        ),
        driver
    );
    let report = report.expect("session succeeds");
    assert_eq!(report.end, RpcSessionEnd::Shutdown);

    let responses = parse_responses(&output);
    assert_eq!(responses.len(), 4);
    assert_eq!(
        response_with_id(&responses, &json!("a"))["data"]["body"],
        json!({"server": "first"})
    );
    assert_eq!(
        response_with_id(&responses, &json!("r"))["data"],
        json!({"reloaded": true})
    );
    assert_eq!(
        response_with_id(&responses, &json!("b"))["data"]["body"],
        json!({"server": "second"})
    );
    second_who.assert_calls(1);
}
