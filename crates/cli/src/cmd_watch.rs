//! `docket watch` — stream live case activity and alerts to the terminal.

use std::sync::Arc;

use comfy_table::{presets::UTF8_FULL, Table};
use console::style;
use tokio::sync::mpsc;

use docket_protocol::{CaseKind, CaseStatus};
use docket_sync::{
    Alert, AlertSeverity, CaseQuery, CaseReadApi, ConnectionStatus, FieldWriteApi, HttpCaseApi,
    NotificationBridge, SyncConfig, SyncEngine, SyncHandle,
};

pub async fn run(server: &str, api: &str, cases: Vec<String>) -> anyhow::Result<()> {
    let http = Arc::new(HttpCaseApi::new(api));
    let read: Arc<dyn CaseReadApi> = http.clone();
    let write: Arc<dyn FieldWriteApi> = http;
    let handle = SyncEngine::spawn(SyncConfig::new(server), read, write)?;

    let (alerts_tx, mut alerts_rx) = mpsc::channel(64);
    let bridge = NotificationBridge::spawn(&handle, alerts_tx).await?;

    handle.connect();

    println!();
    println!("  docket watch — {server}");
    if cases.is_empty() {
        println!("  Following global case activity. Press Ctrl-C to stop.");
    } else {
        println!(
            "  Following {} case(s). Press Ctrl-C to stop.",
            cases.len()
        );
    }
    println!();

    for case_id in &cases {
        handle.subscribe_to_case(case_id);
        if let Err(err) = handle.load_case(case_id).await {
            println!(
                "  {} could not load case {case_id}: {err}",
                style("warn").yellow()
            );
        }
    }

    let mut status_rx = handle.connection();
    loop {
        tokio::select! {
            maybe = alerts_rx.recv() => match maybe {
                Some(alert) => print_alert(&alert),
                None => break,
            },
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *status_rx.borrow_and_update();
                println!("  {} {}", style("link").dim(), describe_status(status));
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }
    }

    bridge.shutdown().await;
    print_case_table(&handle);
    handle.shutdown().await;
    Ok(())
}

fn print_alert(alert: &Alert) {
    let tag = match alert.severity {
        AlertSeverity::Info => style("info ").cyan(),
        AlertSeverity::Success => style("ok   ").green(),
        AlertSeverity::Warning => style("warn ").yellow(),
        AlertSeverity::Error => style("error").red(),
    };
    match (&alert.body, &alert.case_id) {
        (Some(body), Some(case_id)) => {
            println!("  {tag} [{case_id}] {} — {body}", alert.title);
        }
        (Some(body), None) => println!("  {tag} {} — {body}", alert.title),
        (None, Some(case_id)) => println!("  {tag} [{case_id}] {}", alert.title),
        (None, None) => println!("  {tag} {}", alert.title),
    }
}

pub(crate) fn describe_status(status: ConnectionStatus) -> String {
    match status {
        ConnectionStatus::Disconnected => "disconnected".to_string(),
        ConnectionStatus::Connecting => "connecting".to_string(),
        ConnectionStatus::Connected { generation } if generation > 1 => {
            format!("reconnected (session {generation})")
        }
        ConnectionStatus::Connected { .. } => "connected".to_string(),
        ConnectionStatus::Reconnecting { attempt } => {
            format!("reconnecting (attempt {attempt})")
        }
        ConnectionStatus::Closed => "closed".to_string(),
    }
}

fn print_case_table(handle: &SyncHandle) {
    let cases = handle.query(&CaseQuery::default());
    if cases.is_empty() {
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["Case", "Title", "Kind", "Status", "Fields", "Edited"]);
    for case in &cases {
        let edited = case.fields.iter().filter(|f| f.manually_edited).count();
        table.add_row([
            case.id.clone(),
            case.title.clone(),
            kind_label(case.kind).to_string(),
            status_label(case.status).to_string(),
            case.fields.len().to_string(),
            edited.to_string(),
        ]);
    }
    println!("{table}");
    println!();
}

fn kind_label(kind: CaseKind) -> &'static str {
    match kind {
        CaseKind::Invoice => "invoice",
        CaseKind::Contract => "contract",
        CaseKind::Claim => "claim",
        CaseKind::Statement => "statement",
    }
}

fn status_label(status: CaseStatus) -> &'static str {
    match status {
        CaseStatus::Received => "received",
        CaseStatus::Scanning => "scanning",
        CaseStatus::Extracting => "extracting",
        CaseStatus::Review => "review",
        CaseStatus::Approved => "approved",
        CaseStatus::Rejected => "rejected",
    }
}
