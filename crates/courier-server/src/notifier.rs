//! Payment notifier listener.
//!
//! Serves the notifier surface on its own raw WebSocket port and runs the
//! payment status poller next to it.

use crate::config::Config;
use crate::metrics;
use anyhow::{Context, Result};
use courier_core::{ConnectionHandle, Notifier, PaymentStatusSource, SimulatedPaymentSource};
use courier_protocol::{NotifierFrame, WireFormat};
use courier_transport::{
    recv_frame, send_frame, Connection, Transport, WebSocketConfig, WebSocketTransport,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Bind the notifier listener.
///
/// # Errors
///
/// Returns an error if the address is invalid or the port cannot be bound.
pub async fn bind(config: &Config) -> Result<WebSocketTransport> {
    let addr = config.notifier_addr()?;
    WebSocketTransport::new(WebSocketConfig {
        bind_addr: addr,
        max_message_size: config.limits.max_message_size,
    })
    .await
    .with_context(|| format!("Failed to bind notifier listener on {}", addr))
}

/// Start the poller against the simulated payment source.
pub fn spawn_poller(config: &Config, notifier: Arc<Notifier>) -> tokio::task::JoinHandle<()> {
    let source: Arc<dyn PaymentStatusSource> = Arc::new(SimulatedPaymentSource::new(
        config.notifier.requester.clone(),
        config.notifier.payer.clone(),
        config.notifier.amount,
    ));
    let interval = Duration::from_millis(config.notifier.poll_interval_ms);
    tokio::spawn(courier_core::run_poller(notifier, source, interval))
}

/// Accept notifier connections until the listener fails.
pub async fn serve(transport: WebSocketTransport, notifier: Arc<Notifier>, queue_capacity: usize) {
    if let Some(addr) = transport.local_addr() {
        info!("Notifier listening on ws://{}", addr);
    }

    loop {
        match transport.accept().await {
            Ok(conn) => {
                tokio::spawn(handle_connection(conn, notifier.clone(), queue_capacity));
            }
            Err(e) => {
                // Handshake failures only affect one client.
                warn!(transport = transport.name(), error = %e, "Notifier accept failed");
            }
        }
    }
}

/// Handle one notifier connection.
async fn handle_connection(
    mut conn: Box<dyn Connection>,
    notifier: Arc<Notifier>,
    queue_capacity: usize,
) {
    let _metrics_guard = metrics::ConnectionMetricsGuard::new();
    let (handle, mut rx) = ConnectionHandle::channel(queue_capacity);
    let connection_id = handle.id().clone();
    let mut format = WireFormat::Json;

    debug!(connection = %connection_id, remote = ?conn.remote_addr(), "Notifier client connected");
    notifier.connect(handle);

    loop {
        tokio::select! {
            biased;

            Some(frame) = rx.recv() => {
                if let Err(e) = send_frame(conn.as_mut(), &frame, format).await {
                    debug!(connection = %connection_id, error = %e, "Notifier send failed");
                    break;
                }
            }

            received = recv_frame::<NotifierFrame>(conn.as_mut()) => {
                match received {
                    Ok(Some((NotifierFrame::Register { user_id }, received_format))) => {
                        format = received_format;
                        if let Err(e) = notifier.register(&connection_id, &user_id) {
                            warn!(connection = %connection_id, error = %e, "Registration ack dropped");
                        }
                    }
                    Ok(Some((frame, _))) => {
                        warn!(connection = %connection_id, frame = ?frame, "Unexpected notifier frame");
                        metrics::record_malformed("notifier");
                    }
                    Ok(None) => break,
                    Err(e) if e.is_recoverable() => {
                        warn!(connection = %connection_id, error = %e, "Malformed notifier frame");
                        metrics::record_malformed("notifier");
                    }
                    Err(e) => {
                        error!(connection = %connection_id, error = %e, "Notifier connection error");
                        break;
                    }
                }
            }
        }
    }

    notifier.disconnect(&connection_id);
    if let Err(e) = conn.close().await {
        debug!(connection = %connection_id, error = %e, "Notifier close failed");
    }
    debug!(connection = %connection_id, "Notifier client disconnected");
}
