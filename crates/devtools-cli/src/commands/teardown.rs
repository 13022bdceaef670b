use anyhow::{Context, Result};
use devtools_config::host_pipe_path;
use devtools_runtime::PipeRpcClient;
use serde_json::json;
use std::time::Duration;

pub async fn execute() -> Result<()> {
    let client = PipeRpcClient::new(host_pipe_path());
    let reply = client
        .request("teardown", json!({}), Duration::from_secs(30))
        .await
        .context("teardown failed")?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}
