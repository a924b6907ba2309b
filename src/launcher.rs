//! Process launcher
//!
//! Starts a group of processes on one in-process bus, plays a short scripted
//! interaction between the first three of them, and stops everyone after the
//! configured running time.
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use crate::com::Com;
use crate::error::Result;
use crate::rank::Rank;
use crate::settings::Settings;
use crate::transport::{Bus, LocalBus};

/// What one process went through
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessReport {
    pub name: String,
    pub rank: Option<Rank>,
    pub group_size: usize,
    /// Payloads taken from the inbox or received by rendezvous, in order
    pub received: Vec<String>,
    /// Whether this process entered the critical section first
    pub won_race: Option<bool>,
    pub finished: bool,
    pub error: Option<String>,
}

/// Run every process to completion and return their reports, ordered by
/// process index.
pub async fn launch(settings: Settings) -> Result<Vec<ProcessReport>> {
    settings.validate()?;
    let bus = Arc::new(LocalBus::new());
    let names = settings.process_names();
    let (stop_tx, stop_rx) = watch::channel(false);

    let handles: Vec<_> = names
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let bus: Arc<dyn Bus> = bus.clone();
            let names = names.clone();
            let name = name.clone();
            let config = settings.com.clone();
            let stop_rx = stop_rx.clone();
            tokio::spawn(async move {
                let mut report = ProcessReport {
                    name: name.clone(),
                    ..ProcessReport::default()
                };
                let com = match Com::new(name, bus, config).await {
                    Ok(com) => com,
                    Err(e) => {
                        report.error = Some(e.to_string());
                        return report;
                    }
                };
                report.rank = Some(com.rank());
                report.group_size = com.group_size();
                info!(
                    "@{} - started with rank {} among {} process(es)",
                    report.name,
                    com.rank(),
                    com.group_size()
                );

                let mut stop_rx = stop_rx;
                let outcome = tokio::select! {
                    result = play(&com, index, &names, &mut report) => Some(result),
                    _ = stop_rx.wait_for(|stop| *stop) => None,
                };
                if let Some(result) = outcome {
                    match result {
                        Ok(()) => report.finished = true,
                        Err(e) => report.error = Some(e.to_string()),
                    }
                    let _ = stop_rx.wait_for(|stop| *stop).await;
                }
                com.stop().await;
                report
            })
        })
        .collect();

    tokio::time::sleep(settings.running_time).await;
    stop_tx.send_replace(true);

    let mut reports = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(report) => reports.push(report),
            Err(e) => error!("process task failed: {}", e),
        }
    }
    bus.shutdown();
    Ok(reports)
}

/// The scripted interaction. With at least three processes the first three
/// play distinct parts; everyone then meets at a barrier and races for the
/// token.
async fn play(com: &Com, index: usize, names: &[String], report: &mut ProcessReport) -> Result<()> {
    if names.len() >= 3 {
        let (p0, p1, p2) = (&names[0], &names[1], &names[2]);
        match index {
            0 => {
                com.send_to(format!("calling {} first, I'll get back to you", p2), p1)
                    .await?;
                com.send_to_sync(
                    format!("left {} a message, shall we all sync up and play?", p1),
                    p2,
                )
                .await?;
                let reply = com.recv_from_sync(p2).await?;
                record(report, &reply);
                com.send_to_sync(format!("{} is in, let's sync up and go!", p2), p1)
                    .await?;
            }
            1 => {
                let first = com.mailbox().recv().await;
                record(report, &first);
                let call = com.recv_from_sync(p0).await?;
                record(report, &call);
            }
            2 => {
                let call = com.recv_from_sync(p0).await?;
                record(report, &call);
                com.send_to_sync("OK", p0).await?;
            }
            _ => {}
        }
    }

    com.synchronize().await?;

    com.request_critical_section().await?;
    if com.mailbox().is_empty() {
        info!("@{} - caught it!", com.name());
        report.won_race = Some(true);
        com.ack_needed_broadcast(format!("{} won!", com.name()))
            .await?;
    } else if let Some(message) = com.mailbox().take_message() {
        info!(
            "@{} - rank {:?} got the token first",
            com.name(),
            message.sender
        );
        report.won_race = Some(false);
        record(report, &message);
    }
    com.release_critical_section().await?;

    info!("@{} - execution finished with rank {}", com.name(), com.rank());
    Ok(())
}

fn record(report: &mut ProcessReport, message: &crate::messages::Message) {
    let text = match message.content_str() {
        Some(text) => text.to_string(),
        None => message
            .content()
            .map(ToString::to_string)
            .unwrap_or_default(),
    };
    info!("@{} - received: {}", report.name, text);
    report.received.push(text);
}
