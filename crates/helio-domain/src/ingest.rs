//! Ingestion pipeline consumer.
//!
//! The transport boundary pushes messages into a bounded channel; a single
//! consumer task drains it and runs decode, dedupe and increment. Being the
//! only writer gives per-key linearizability without backend-side
//! compare-and-set.

use crate::decoder::{self, DecoderConfig};
use crate::dedup::{DedupConfig, Deduplicator};
use crate::error::DomainResult;
use crate::repository::TotalsNotifier;
use crate::service::DailyTotalsService;
use crate::types::{DayTotals, TelemetryEvent};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One message handed over from the transport boundary
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    Telemetry(TelemetryEvent),
    DeviceIdentity {
        owner_id: String,
        device_id: String,
        raw_payload: String,
    },
}

pub struct IngestService {
    totals: Arc<DailyTotalsService>,
    notifier: Arc<dyn TotalsNotifier>,
    decoder: DecoderConfig,
    // Sync mutex: only this consumer touches it, and never across an await
    dedup: std::sync::Mutex<Deduplicator>,
}

impl IngestService {
    pub fn new(
        totals: Arc<DailyTotalsService>,
        notifier: Arc<dyn TotalsNotifier>,
        decoder: DecoderConfig,
        dedup: DedupConfig,
    ) -> Self {
        Self {
            totals,
            notifier,
            decoder,
            dedup: std::sync::Mutex::new(Deduplicator::new(dedup)),
        }
    }

    pub async fn handle_message(&self, message: IncomingMessage) -> DomainResult<()> {
        match message {
            IncomingMessage::Telemetry(event) => self.handle_telemetry(event).await,
            IncomingMessage::DeviceIdentity {
                owner_id,
                device_id,
                raw_payload,
            } => {
                let name = decoder::decode_device_identity(&device_id, &raw_payload);
                self.notifier
                    .device_identity_seen(&owner_id, &device_id, &name)
                    .await
            }
        }
    }

    async fn handle_telemetry(&self, event: TelemetryEvent) -> DomainResult<()> {
        let fresh = {
            let mut dedup = self.dedup.lock().unwrap_or_else(|e| e.into_inner());
            dedup.should_process(
                &event.owner_id,
                &event.device_id,
                &event.raw_payload,
                Instant::now(),
            )
        };
        if !fresh {
            debug!(
                owner_id = %event.owner_id,
                device_id = %event.device_id,
                "duplicate telemetry suppressed"
            );
            return Ok(());
        }

        let decoded = decoder::decode_telemetry(&event.device_id, &event.raw_payload, &self.decoder);
        if decoded.is_zero() {
            debug!(
                owner_id = %event.owner_id,
                device_id = %event.device_id,
                "telemetry decoded to zero deltas, no increment"
            );
            return Ok(());
        }

        let totals = self
            .totals
            .increment(
                &event.owner_id,
                &event.device_id,
                DayTotals::new(decoded.delta_a, decoded.delta_a2),
            )
            .await?;

        debug!(
            owner_id = %event.owner_id,
            device_id = %event.device_id,
            total_a = %totals.total_a,
            total_a2 = %totals.total_a2,
            "applied telemetry increment"
        );
        Ok(())
    }
}

/// Single consumer draining the transport channel. Registered exactly once
/// at startup; transport reconnects never spawn another.
pub async fn run_ingest_loop(
    mut rx: mpsc::Receiver<IncomingMessage>,
    ingest: Arc<IngestService>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    info!("starting ingestion consumer");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("ingestion consumer stopping");
                break;
            }
            message = rx.recv() => {
                match message {
                    Some(message) => {
                        if let Err(e) = ingest.handle_message(message).await {
                            warn!(error = %e, "failed to process inbound message");
                        }
                    }
                    None => {
                        info!("transport channel closed, ingestion consumer stopping");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
