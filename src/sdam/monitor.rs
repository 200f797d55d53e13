use std::time::{Duration, Instant};

use super::{
    description::server::ServerDescription,
    topology::{CheckRequestReceiver, TopologyUpdater, TopologyWatcher},
    TopologyVersion,
    DEFAULT_HEARTBEAT_FREQUENCY,
    MIN_HEARTBEAT_FREQUENCY,
};
use crate::{
    client::options::{ClientOptions, ServerAddress},
    cmap::{establish::ConnectionEstablisher, Connection},
    error::{Error, Result},
    event::sdam::{SdamEvent, SdamEventHandler},
    hello::{hello_command, run_hello, AwaitableHelloOptions, HelloReply},
    runtime,
};

/// The default amount of time a streaming hello is allowed to await a
/// topology change before the server replies anyway.
const DEFAULT_MAX_AWAIT_TIME: Duration = Duration::from_secs(10);

/// Weight of the newest sample in the round-trip-time moving average, per the
/// SDAM specification.
const RTT_EWMA_WEIGHT: f64 = 0.2;

/// Monitor that performs regular heartbeats on a single server to determine
/// its status, publishing a new `ServerDescription` after every check.
pub(crate) struct Monitor {
    address: ServerAddress,
    connection: Option<Connection>,
    establisher: ConnectionEstablisher,
    topology_updater: TopologyUpdater,
    topology_watcher: TopologyWatcher,
    check_request_receiver: CheckRequestReceiver,
    event_handler: Option<SdamEventHandler>,
    client_options: ClientOptions,

    /// The `topologyVersion` from the latest reply, which enables the
    /// streaming protocol once known.
    topology_version: Option<TopologyVersion>,

    /// Exponentially weighted moving average of this server's check
    /// round-trip times.
    average_rtt: Option<Duration>,

    consecutive_failures: u32,
}

impl Monitor {
    pub(crate) fn start(
        address: ServerAddress,
        topology_updater: TopologyUpdater,
        topology_watcher: TopologyWatcher,
        check_request_receiver: CheckRequestReceiver,
        establisher: ConnectionEstablisher,
        client_options: ClientOptions,
    ) {
        let event_handler = client_options.sdam_event_handler.clone();
        let monitor = Self {
            address,
            connection: None,
            establisher,
            topology_updater,
            topology_watcher,
            check_request_receiver,
            event_handler,
            client_options,
            topology_version: None,
            average_rtt: None,
            consecutive_failures: 0,
        };
        runtime::spawn(monitor.execute());
    }

    async fn execute(mut self) {
        let heartbeat_frequency = self
            .client_options
            .heartbeat_freq
            .unwrap_or(DEFAULT_HEARTBEAT_FREQUENCY);

        while self.is_alive() {
            self.check_server().await;

            if !self.is_alive() {
                break;
            }

            // While streaming, the server sends a new reply whenever its
            // state changes (or maxAwaitTimeMS elapses), so loop straight
            // into the next read.
            if self
                .connection
                .as_ref()
                .map(|conn| conn.is_streaming())
                .unwrap_or(false)
            {
                continue;
            }

            if self.consecutive_failures > 1 {
                // repeated failures back off exponentially, capped at the
                // heartbeat frequency
                let backoff = MIN_HEARTBEAT_FREQUENCY
                    .saturating_mul(2u32.saturating_pow(self.consecutive_failures - 1))
                    .min(heartbeat_frequency);
                runtime::delay_for(backoff).await;
            } else if self.consecutive_failures == 1 {
                // a fresh failure is reprobed quickly to catch fast restarts
                runtime::delay_for(MIN_HEARTBEAT_FREQUENCY).await;
            } else {
                runtime::delay_for(MIN_HEARTBEAT_FREQUENCY).await;
                // a server with a known topologyVersion holds the next hello
                // open server-side, so only the polling protocol waits out
                // the heartbeat interval client-side
                if self.topology_version.is_none() {
                    self.check_request_receiver
                        .wait_for_check_request(
                            heartbeat_frequency.saturating_sub(MIN_HEARTBEAT_FREQUENCY),
                        )
                        .await;
                }
            }
        }

        // drop the dedicated connection on the way out
        self.connection.take();
    }

    fn is_alive(&self) -> bool {
        self.topology_watcher.is_alive()
            && self
                .topology_watcher
                .peek()
                .description
                .get_server_description(&self.address)
                .is_some()
    }

    /// Runs a single check of the server, publishing the outcome.
    async fn check_server(&mut self) {
        match self.perform_hello().await {
            Ok(reply) => {
                self.consecutive_failures = 0;
                self.topology_version = reply.command_response.topology_version;

                let description = ServerDescription::new_from_hello_reply(
                    self.address.clone(),
                    reply,
                    self.average_rtt,
                );
                self.topology_updater.update(description);
            }
            Err(error) => {
                self.consecutive_failures += 1;
                self.topology_version = None;
                self.connection.take();
                self.average_rtt = None;
                tracing::debug!(
                    address = %self.address,
                    error = %error,
                    "server heartbeat failed"
                );
                self.topology_updater
                    .handle_monitor_error(self.address.clone(), error);
            }
        }
    }

    async fn perform_hello(&mut self) -> Result<HelloReply> {
        self.emit_event(|| SdamEvent::ServerHeartbeatStarted {
            address: self.address.clone(),
        });

        let start = Instant::now();
        let result = self.hello_round_trip().await;
        let duration = start.elapsed();

        match result {
            Ok(ref reply) => {
                // the awaitable form holds the request server-side, so only
                // short (non-awaited) exchanges are RTT samples
                if duration < DEFAULT_MAX_AWAIT_TIME {
                    self.update_average_rtt(duration);
                }
                self.emit_event(|| {
                    let mut reply_doc = reply.raw_command_response.clone();
                    reply_doc.remove("speculativeAuthenticate");
                    SdamEvent::ServerHeartbeatSucceeded {
                        address: self.address.clone(),
                        duration,
                        reply: reply_doc,
                    }
                });
            }
            Err(ref error) => {
                self.emit_event(|| SdamEvent::ServerHeartbeatFailed {
                    address: self.address.clone(),
                    duration,
                    failure: error.clone(),
                });
            }
        }

        result
    }

    async fn hello_round_trip(&mut self) -> Result<HelloReply> {
        let heartbeat_frequency = self
            .client_options
            .heartbeat_freq
            .unwrap_or(DEFAULT_HEARTBEAT_FREQUENCY);

        match self.connection {
            Some(ref mut conn) if conn.is_streaming() => {
                // the server continues pushing replies on its own
                let timeout = heartbeat_frequency + DEFAULT_MAX_AWAIT_TIME;
                let response = runtime::timeout(timeout, conn.receive_message()).await??;
                response.into_hello_reply()
            }
            Some(ref mut conn) => {
                let awaitable_options =
                    self.topology_version
                        .map(|topology_version| AwaitableHelloOptions {
                            topology_version,
                            max_await_time: DEFAULT_MAX_AWAIT_TIME,
                        });

                let command = hello_command(
                    conn.stream_description
                        .as_ref()
                        .map(|sd| sd.hello_ok),
                    awaitable_options,
                );

                let timeout = heartbeat_frequency + DEFAULT_MAX_AWAIT_TIME;
                runtime::timeout(timeout, run_hello(conn, command)).await?
            }
            None => {
                let (connection, reply) = self
                    .establisher
                    .establish_monitoring_connection(self.address.clone())
                    .await?;
                self.connection = Some(connection);
                Ok(reply)
            }
        }
    }

    fn update_average_rtt(&mut self, sample: Duration) {
        self.average_rtt = Some(ewma(self.average_rtt, sample));
    }

    fn emit_event<F>(&self, event: F)
    where
        F: FnOnce() -> SdamEvent,
    {
        if let Some(ref handler) = self.event_handler {
            handler(event());
        }
    }
}

/// Exponentially weighted moving average of round-trip times.
fn ewma(old: Option<Duration>, sample: Duration) -> Duration {
    match old {
        Some(old_rtt) => Duration::from_secs_f64(
            sample.as_secs_f64() * RTT_EWMA_WEIGHT
                + old_rtt.as_secs_f64() * (1.0 - RTT_EWMA_WEIGHT),
        ),
        None => sample,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtt_moving_average() {
        // first sample is taken as-is
        assert_eq!(ewma(None, Duration::from_millis(10)), Duration::from_millis(10));

        // subsequent samples are weighted at 0.2
        let averaged = ewma(Some(Duration::from_millis(10)), Duration::from_millis(20));
        assert!((averaged.as_secs_f64() - 0.012).abs() < 1e-9);

        // a burst of slow samples converges towards the new value
        let mut rtt = Duration::from_millis(10);
        for _ in 0..50 {
            rtt = ewma(Some(rtt), Duration::from_millis(100));
        }
        assert!(rtt > Duration::from_millis(99));
    }
}
