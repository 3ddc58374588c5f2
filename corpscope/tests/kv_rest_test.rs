use std::io::Write;
use std::time::{Duration, Instant};

use corpscope::kv::{KvError, KvStore, RestKvClient};
use corpscope::lock::DistributedLock;
use mockito::Matcher;
use serde_json::json;

fn client(server: &mockito::ServerGuard) -> RestKvClient {
    RestKvClient::new(Some(server.url()), Some("kv-token".to_string()))
}

#[tokio::test]
async fn test_get_hit_and_miss() {
    let mut server = mockito::Server::new_async().await;

    let hit = server
        .mock("GET", "/get/report:acme")
        .match_header("authorization", "Bearer kv-token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r###"{"result": "## Summary"}"###)
        .create_async()
        .await;
    let miss = server
        .mock("GET", "/get/report:globex")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"result": null}"#)
        .create_async()
        .await;

    let kv = client(&server);
    assert_eq!(kv.get("report:acme").await.unwrap().as_deref(), Some("## Summary"));
    assert_eq!(kv.get("report:globex").await.unwrap(), None);

    hit.assert_async().await;
    miss.assert_async().await;
}

#[tokio::test]
async fn test_backend_errors_surface() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("GET", "/get/report:acme")
        .with_status(401)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error": "WRONGPASS invalid password"}"#)
        .create_async()
        .await;

    let err = client(&server).get("report:acme").await.unwrap_err();
    match err {
        KvError::Backend { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "WRONGPASS invalid password");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_set_with_expiry_uses_pipeline() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/pipeline")
        .match_header("authorization", "Bearer kv-token")
        .match_body(Matcher::Json(json!([[
            "SET",
            "report:acme",
            "line one\nline two",
            "EX",
            "604800"
        ]])))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"result": "OK"}]"#)
        .create_async()
        .await;

    client(&server)
        .set_with_expiry("report:acme", "line one\nline two", Duration::from_secs(604800))
        .await
        .expect("write succeeds");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_set_if_absent_reports_contention() {
    let mut server = mockito::Server::new_async().await;

    let taken = server
        .mock("POST", "/pipeline")
        .match_body(Matcher::Json(json!([["SET", "lock:acme", "token-1", "NX", "EX", "120"]])))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"result": "OK"}]"#)
        .create_async()
        .await;
    let held = server
        .mock("POST", "/pipeline")
        .match_body(Matcher::Json(json!([["SET", "lock:acme", "token-2", "NX", "EX", "120"]])))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"result": null}]"#)
        .create_async()
        .await;

    let kv = client(&server);
    let ttl = Duration::from_secs(120);
    assert!(kv.set_if_absent("lock:acme", "token-1", ttl).await.unwrap());
    assert!(!kv.set_if_absent("lock:acme", "token-2", ttl).await.unwrap());

    taken.assert_async().await;
    held.assert_async().await;
}

#[tokio::test]
async fn test_compare_and_delete_runs_script() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/pipeline")
        .match_body(Matcher::Regex(r#"\["EVAL",".*redis\.call\('del'.*","1","lock:acme","token-1"\]"#.to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"result": 1}]"#)
        .create_async()
        .await;

    assert!(client(&server).delete_if_equals("lock:acme", "token-1").await.unwrap());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_command_error_is_reported() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/pipeline")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"error": "ERR syntax error"}]"#)
        .create_async()
        .await;

    let err = client(&server).delete("report:acme").await.unwrap_err();
    assert!(matches!(err, KvError::Command(ref m) if m == "ERR syntax error"));
}

#[tokio::test]
async fn test_lock_over_rest_backend() {
    let mut server = mockito::Server::new_async().await;

    let acquire = server
        .mock("POST", "/pipeline")
        .match_body(Matcher::Regex(r#"\["SET","lock:acme","[0-9a-f]{32}","NX","EX","60"\]"#.to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"result": "OK"}]"#)
        .create_async()
        .await;
    let release = server
        .mock("POST", "/pipeline")
        .match_body(Matcher::Regex(r#"\["EVAL",.*"lock:acme","[0-9a-f]{32}"\]"#.to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"result": 1}]"#)
        .create_async()
        .await;

    let lock = DistributedLock::new(std::sync::Arc::new(client(&server)));
    let guard = lock
        .acquire("lock:acme", Duration::from_secs(60))
        .await
        .unwrap()
        .expect("lock granted");
    assert!(lock.release(&guard).await);

    acquire.assert_async().await;
    release.assert_async().await;
}

#[tokio::test]
async fn test_unconfigured_client_is_inert() {
    let kv = RestKvClient::new(Some("https://kv.example.com".to_string()), None);
    assert!(!kv.is_configured());
    assert_eq!(kv.get("report:acme").await.unwrap(), None);
    kv.set_with_expiry("report:acme", "x", Duration::from_secs(1))
        .await
        .unwrap();
    assert!(!kv.set_if_absent("lock:acme", "t", Duration::from_secs(1)).await.unwrap());
}

#[tokio::test]
async fn test_stalled_body_times_out() {
    let mut server = mockito::Server::new_async().await;

    let _get = server
        .mock("GET", "/get/report:acme")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_chunked_body(|w| {
            w.write_all(br#"{"result": "#)?;
            std::thread::sleep(Duration::from_millis(1500));
            w.write_all(br#"null}"#)
        })
        .create_async()
        .await;
    let _set = server
        .mock("POST", "/pipeline")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_chunked_body(|w| {
            w.write_all(br#"[{"result": "#)?;
            std::thread::sleep(Duration::from_millis(1500));
            w.write_all(br#""OK"}]"#)
        })
        .create_async()
        .await;

    let kv = client(&server).with_timeout(Duration::from_millis(100));

    let started = Instant::now();
    let err = kv.get("report:acme").await.unwrap_err();
    assert!(matches!(err, KvError::Timeout(_)), "unexpected: {:?}", err);
    assert!(started.elapsed() < Duration::from_secs(1));

    let started = Instant::now();
    let err = kv
        .set_if_absent("lock:acme", "token-1", Duration::from_secs(60))
        .await
        .unwrap_err();
    assert!(matches!(err, KvError::Timeout(_)), "unexpected: {:?}", err);
    assert!(started.elapsed() < Duration::from_secs(1));
}
