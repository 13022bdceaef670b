//! Integration tests across the runtime crates: RPC server + registry +
//! arbiter + ledger working together over real Unix sockets.
#![cfg(unix)]

use devtools_config::WorkspacePaths;
use devtools_runtime::{
    claim_role_at, install_client_handlers, Error, PipeRpcClient, PipeRpcServer, ProcessLedger,
    Role, RpcHandler,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn temp_pipe(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "devtools-integration-{}-{}.sock",
        name,
        std::process::id()
    ))
}

#[derive(Debug, Deserialize)]
struct GreetInput {
    name: String,
}

#[derive(Debug, Serialize)]
struct GreetOutput {
    message: String,
}

struct GreetHandler;

#[async_trait::async_trait]
impl RpcHandler for GreetHandler {
    type Input = GreetInput;
    type Output = GreetOutput;
    type Error = Error;

    async fn handle(&self, input: Self::Input) -> Result<Self::Output, Self::Error> {
        Ok(GreetOutput {
            message: format!("Hello, {}!", input.name),
        })
    }
}

// ============================================================================
// Server + registry over the wire
// ============================================================================

#[tokio::test]
async fn test_register_call_unregister_call() {
    let server = PipeRpcServer::new();
    let path = temp_pipe("lifecycle");
    server.start(&path).await.unwrap();
    server.register_handler("greet", GreetHandler).await;

    let client = PipeRpcClient::new(&path);
    let result = client
        .request("greet", json!({"name": "World"}), Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(result["message"], "Hello, World!");

    assert!(server.unregister_handler("greet").await);
    let err = client
        .request("greet", json!({"name": "World"}), Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Method not found"));

    server.stop().await;
}

#[tokio::test]
async fn test_reregistration_dispatches_to_latest() {
    struct Versioned(&'static str);

    #[async_trait::async_trait]
    impl RpcHandler for Versioned {
        type Input = serde_json::Value;
        type Output = serde_json::Value;
        type Error = Error;

        async fn handle(&self, _input: Self::Input) -> Result<Self::Output, Self::Error> {
            Ok(json!({"version": self.0}))
        }
    }

    let server = PipeRpcServer::new();
    let path = temp_pipe("replace");
    server.start(&path).await.unwrap();
    server.register_handler("which", Versioned("first")).await;
    server.register_handler("which", Versioned("second")).await;

    let client = PipeRpcClient::new(&path);
    let result = client
        .request("which", json!({}), Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(result["version"], "second");

    server.stop().await;
}

#[tokio::test]
async fn test_ping_advertises_handler_set_changes() {
    let server = PipeRpcServer::new();
    let path = temp_pipe("advertise");
    server.start(&path).await.unwrap();

    let client = PipeRpcClient::new(&path);
    assert!(client
        .ping(Duration::from_secs(2))
        .await
        .unwrap()
        .registered_methods
        .is_empty());

    server.register_handler("greet", GreetHandler).await;
    assert_eq!(
        client.ping(Duration::from_secs(2)).await.unwrap().registered_methods,
        vec!["greet"]
    );

    server.unregister_handler("greet").await;
    assert!(client
        .ping(Duration::from_secs(2))
        .await
        .unwrap()
        .registered_methods
        .is_empty());

    server.stop().await;
}

// ============================================================================
// Role arbitration across multiple servers
// ============================================================================

#[tokio::test]
async fn test_arbitration_host_then_client_then_host_again() {
    let host_pipe = temp_pipe("arb-host");
    let client_pipe = temp_pipe("arb-client");

    // Process A claims Host.
    let a = PipeRpcServer::new();
    assert_eq!(
        claim_role_at(&a, &host_pipe, &client_pipe).await.unwrap(),
        Role::Host
    );

    // Process B, launched second, lands on Client.
    let b = PipeRpcServer::new();
    assert_eq!(
        claim_role_at(&b, &host_pipe, &client_pipe).await.unwrap(),
        Role::Client
    );

    // A shuts down; process C claims Host.
    a.stop().await;
    let c = PipeRpcServer::new();
    assert_eq!(
        claim_role_at(&c, &host_pipe, &client_pipe).await.unwrap(),
        Role::Host
    );

    // Host and Client answer ping independently.
    assert!(PipeRpcClient::new(&host_pipe)
        .ping(Duration::from_secs(2))
        .await
        .unwrap()
        .alive);
    assert!(PipeRpcClient::new(&client_pipe)
        .ping(Duration::from_secs(2))
        .await
        .unwrap()
        .alive);

    b.stop().await;
    c.stop().await;
}

// ============================================================================
// Ledger over the client pipe
// ============================================================================

#[tokio::test]
async fn test_ledger_rpc_roundtrip_with_kill() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(ProcessLedger::new(WorkspacePaths::new(dir.path())));
    ledger.initialize().await.unwrap();

    let mut child = std::process::Command::new("sleep")
        .arg("30")
        .spawn()
        .unwrap();
    let pid = child.id();
    ledger.log_started(pid, "sleep 30", None).await.unwrap();

    let server = PipeRpcServer::new();
    install_client_handlers(&server, ledger).await;
    let path = temp_pipe("ledger");
    server.start(&path).await.unwrap();

    let client = PipeRpcClient::new(&path);
    let summary = client
        .request("system.getProcessLedger", json!({}), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(summary["active"][0]["pid"], json!(pid));

    let reply = client
        .request("process.kill", json!({"pid": pid}), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(reply["killed"], json!(true));

    let summary = client
        .request("system.getProcessLedger", json!({}), Duration::from_secs(5))
        .await
        .unwrap();
    assert!(summary["active"].as_array().unwrap().is_empty());
    assert_eq!(summary["recentlyCompleted"][0]["status"], json!("killed"));

    server.stop().await;
    child.wait().ok();
}

#[tokio::test]
async fn test_orphan_flow_over_rpc() {
    let dir = tempfile::tempdir().unwrap();

    let mut child = std::process::Command::new("sleep")
        .arg("30")
        .spawn()
        .unwrap();
    let pid = child.id();

    // Session one records the process, then "crashes" (dropped).
    {
        let ledger = ProcessLedger::new(WorkspacePaths::new(dir.path()));
        ledger.initialize().await.unwrap();
        ledger.log_started(pid, "sleep 30", None).await.unwrap();
    }

    // Session two reconciles and serves the ledger.
    let ledger = Arc::new(ProcessLedger::new(WorkspacePaths::new(dir.path())));
    ledger.initialize().await.unwrap();

    let server = PipeRpcServer::new();
    install_client_handlers(&server, ledger).await;
    let path = temp_pipe("orphans");
    server.start(&path).await.unwrap();

    let client = PipeRpcClient::new(&path);
    let summary = client
        .request("system.getProcessLedger", json!({}), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(summary["orphaned"][0]["pid"], json!(pid));
    assert_eq!(summary["orphaned"][0]["status"], json!("orphaned"));

    let outcome = client
        .request("process.killOrphans", json!({}), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(outcome["killed"], json!([pid]));
    assert!(outcome["failed"].as_array().unwrap().is_empty());

    server.stop().await;
    child.wait().ok();
}

// ============================================================================
// Error taxonomy over the wire
// ============================================================================

#[tokio::test]
async fn test_error_codes_from_live_server() {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let server = PipeRpcServer::new();
    let path = temp_pipe("codes");
    server.start(&path).await.unwrap();

    let stream = devtools_runtime::pipe::connect(&path).await.unwrap();
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();

    // -32700
    write.write_all(b"{oops\n").await.unwrap();
    let line = lines.next_line().await.unwrap().unwrap();
    let response: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(response["error"]["code"], json!(-32700));
    assert_eq!(response["id"], serde_json::Value::Null);

    // -32600
    write.write_all(b"{\"id\":1}\n").await.unwrap();
    let line = lines.next_line().await.unwrap().unwrap();
    let response: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(response["error"]["code"], json!(-32600));

    // -32601
    write
        .write_all(b"{\"id\":2,\"method\":\"nope\"}\n")
        .await
        .unwrap();
    let line = lines.next_line().await.unwrap().unwrap();
    let response: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(response["error"]["code"], json!(-32601));

    server.stop().await;
}
