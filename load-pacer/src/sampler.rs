use std::{fmt, io::Write, str::FromStr, time::Duration};

use tcp_estats::ExtendedStats;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use super::pacer::Pacer;

/// How long the telemetry aggregates live.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryScope {
    /// One aggregate for the whole session, samples show running averages.
    #[default]
    Session,
    /// A fresh aggregate every tick, samples show the latest poll.
    Tick,
}

impl FromStr for TelemetryScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session" => Ok(TelemetryScope::Session),
            "tick" => Ok(TelemetryScope::Tick),
            s => Err(format!("unknown telemetry scope {s}, expected `session` or `tick`")),
        }
    }
}

impl fmt::Display for TelemetryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryScope::Session => f.write_str("session"),
            TelemetryScope::Tick => f.write_str("tick"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRecord {
    pub average_rtt: Option<f64>,
    pub average_cwnd: Option<f64>,
    /// Bytes per second
    pub throughput: f64,
}

impl fmt::Display for SampleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let column = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
        write!(
            f,
            "{}, {}, {}",
            column(self.average_rtt),
            column(self.average_cwnd),
            self.throughput
        )
    }
}

#[derive(Debug, Default, Clone)]
pub struct SamplerReport {
    /// Bytes transferred during the sampled intervals.
    pub total: u64,
    pub samples: usize,
    pub stats: ExtendedStats,
}

pub struct Sampler {
    test_duration: Duration,
    sample_period: Duration,
    scope: TelemetryScope,
}

impl Sampler {
    pub fn new(test_duration: Duration, sample_period: Duration) -> Self {
        Sampler {
            test_duration,
            sample_period,
            scope: TelemetryScope::default(),
        }
    }

    pub fn with_scope(self, scope: TelemetryScope) -> Self {
        Sampler { scope, ..self }
    }

    /// Writes a header and then one record per `sample_period` to `out`,
    /// until cancelled, until the pacer stops, or until `test_duration` elapsed.
    pub async fn run<W>(
        &self,
        token: &CancellationToken,
        pacer: &dyn Pacer,
        out: &mut W,
    ) -> std::io::Result<SamplerReport>
    where
        W: Write,
    {
        writeln!(out, "RTT, Cwnd, Xfer")?;
        let started = Instant::now();
        let mut report = SamplerReport::default();

        loop {
            if token.is_cancelled() {
                log::debug!("client {}: sampling cancelled", pacer.client_id());
                break;
            }
            if !pacer.valid() || !pacer.in_progress() {
                log::info!(
                    "client {}: transfer is {:?}, stop sampling",
                    pacer.client_id(),
                    pacer.state()
                );
                break;
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = time::sleep(self.sample_period) => {}
            }

            if let Some(connection) = pacer.connection() {
                let polled = match self.scope {
                    TelemetryScope::Session => {
                        report.stats.incorporate_connection_stats(&connection)
                    }
                    // the previous reading survives a failed poll
                    TelemetryScope::Tick => {
                        let mut fresh = ExtendedStats::default();
                        let polled = fresh.incorporate_connection_stats(&connection);
                        if polled.is_ok() {
                            report.stats = fresh;
                        }
                        polled
                    }
                };
                let telemetry = match polled {
                    Ok(()) => true,
                    Err(err) => {
                        log::debug!("client {}: no telemetry: {err}", pacer.client_id());
                        false
                    }
                };

                let (transferred, interval) = pacer.transferred_in_interval();
                let throughput = if interval.is_zero() {
                    0.0
                } else {
                    transferred as f64 / interval.as_secs_f64()
                };
                let record = SampleRecord {
                    average_rtt: telemetry.then_some(report.stats.average_rtt),
                    average_cwnd: telemetry.then_some(report.stats.average_cwnd),
                    throughput,
                };
                writeln!(out, "{record}")?;
                out.flush()?;
                report.samples += 1;
                report.total += transferred;
            }

            if started.elapsed() >= self.test_duration {
                break;
            }
        }

        if report.stats.measurements() > 0 {
            log::info!("client {}: {}", pacer.client_id(), report.stats);
        }

        Ok(report)
    }
}
