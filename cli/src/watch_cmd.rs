//! `beacon watch`: keep a session open and print pushes until Ctrl-C.

use anyhow::Context;
use anyhow::Result;
use beacon_core::BeaconConfig;
use beacon_core::Credentials;
use beacon_core::NotificationSession;
use beacon_push_client::EventCategory;
use beacon_push_client::PushMessage;
use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;

use crate::render::render_record;

pub(crate) async fn run(config: &BeaconConfig, credentials: Credentials, json: bool) -> Result<()> {
    let session = NotificationSession::start(config, credentials)
        .await
        .context("failed to start notification session")?;
    let mut status = session.subscribe_status();
    let printer = session
        .push()
        .registry()
        .add_listener(EventCategory::All, move |message| print_push(message, json));

    let summary = session.store().summary();
    eprintln!(
        "Watching notifications ({} loaded, {} unread). Press Ctrl-C to stop.",
        summary.total, summary.unread_count
    );

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                break;
            }
            message = status.recv() => match message {
                Ok(message) => eprintln!("{message}"),
                Err(RecvError::Lagged(skipped)) => tracing::debug!(skipped, "status lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.push().registry().remove_listener(printer);
    session.shutdown().await;
    Ok(())
}

fn print_push(message: &PushMessage, json: bool) {
    if let Some(count) = message.unread_count() {
        if json {
            println!("{}", serde_json::json!({ "unreadCount": count }));
        } else {
            println!("unread: {count}");
        }
        return;
    }
    let Some(notification) = message.notification() else {
        return;
    };
    let record = match notification.clone().into_record(Utc::now()) {
        Ok(record) => record,
        Err(reason) => {
            tracing::debug!("not printing pushed notification: {reason}");
            return;
        }
    };
    if json {
        match serde_json::to_string(&record) {
            Ok(line) => println!("{line}"),
            Err(err) => tracing::warn!("failed to encode notification: {err}"),
        }
    } else {
        println!("{}", render_record(&record));
    }
}
