use anyhow::{Context, Result};
use devtools_config::{client_pipe_path, host_pipe_path};
use devtools_runtime::PipeRpcClient;
use std::time::Duration;

pub async fn execute(client_side: bool) -> Result<()> {
    let (label, path) = if client_side {
        ("client", client_pipe_path())
    } else {
        ("host", host_pipe_path())
    };

    let client = PipeRpcClient::new(&path);
    let reply = client
        .ping(Duration::from_secs(3))
        .await
        .with_context(|| format!("{} pipe did not answer at {}", label, path.display()))?;

    println!("{} alive: {}", label, reply.alive);
    println!("registered methods: {}", reply.registered_methods.join(", "));
    Ok(())
}
