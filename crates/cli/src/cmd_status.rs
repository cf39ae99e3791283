//! `docket status` — check whether the docket server is reachable.

use std::sync::Arc;
use std::time::Duration;

use console::style;

use docket_sync::{
    CaseReadApi, FieldWriteApi, HttpCaseApi, SyncConfig, SyncEngine,
};

use crate::cmd_watch::describe_status;
use crate::VERSION;

const CONNECT_WAIT: Duration = Duration::from_secs(5);

pub async fn run(server: &str, api: &str) -> anyhow::Result<()> {
    println!();
    println!("  Docket CLI v{VERSION}");
    println!("  Server: {server}");
    println!("  API:    {api}");

    let http = Arc::new(HttpCaseApi::new(api));
    let read: Arc<dyn CaseReadApi> = http.clone();
    let write: Arc<dyn FieldWriteApi> = http;
    let handle = SyncEngine::spawn(SyncConfig::new(server), read, write)?;
    handle.connect();

    let mut status_rx = handle.connection();
    let connected = tokio::time::timeout(
        CONNECT_WAIT,
        status_rx.wait_for(|status| status.is_connected()),
    )
    .await;

    match connected {
        Ok(Ok(_)) => println!("  Connection: {}", style("OK").green()),
        Ok(Err(_)) => println!("  Connection: {}", style("engine stopped").red()),
        Err(_) => {
            let status = *handle.connection().borrow();
            println!(
                "  Connection: {} ({} after {}s)",
                style("unreachable").red(),
                describe_status(status),
                CONNECT_WAIT.as_secs()
            );
        }
    }

    println!();
    handle.shutdown().await;
    Ok(())
}
