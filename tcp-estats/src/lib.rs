/// Reference to the live socket of a captured connection.
mod handle;
pub use self::handle::{ConnectionHandle, SocketLease, Security, Transport};

/// Platform query of the kernel maintained TCP statistics.
pub mod tcp_info;
pub use self::tcp_info::TcpInfo;

#[cfg(test)]
mod stats_test;

use std::{fmt, io};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("not a TLS connection")]
    NotSecureTransport,
    #[error("not a TCP connection")]
    NotStreamTransport,
    #[error("extended statistics are not supported on this platform")]
    PlatformUnsupported,
    #[error("the connection is already closed")]
    Closed,
    #[error("cannot get the TCP info for the connection: {_0}")]
    Query(io::Error),
}

/// Whether `ExtendedStats::incorporate_connection_stats` can ever succeed here.
pub const fn extended_stats_available() -> bool {
    tcp_info::available()
}

/// Running aggregates over successive polls of one connection.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ExtendedStats {
    pub max_path_mtu: u64,
    pub max_send_mss: u64,
    pub max_recv_mss: u64,
    /// Sum of the cumulative counter as reported at every poll.
    pub total_retransmissions: u64,
    /// Sum of the reordering metric as reported at every poll.
    pub total_reorderings: u64,
    /// Microseconds
    pub average_rtt: f64,
    /// Segments
    pub average_cwnd: f64,
    rtt_measurements: u64,
    cwnd_measurements: u64,
}

impl ExtendedStats {
    pub fn incorporate_connection_stats(
        &mut self,
        connection: &ConnectionHandle,
    ) -> Result<(), StatsError> {
        if connection.security() != Security::Tls {
            return Err(StatsError::NotSecureTransport);
        }
        if connection.transport() != Transport::Stream {
            return Err(StatsError::NotStreamTransport);
        }
        if !extended_stats_available() {
            return Err(StatsError::PlatformUnsupported);
        }
        let info = connection
            .with_fd(tcp_info::query)
            .ok_or(StatsError::Closed)?
            .map_err(StatsError::Query)?;
        self.incorporate(&info);

        Ok(())
    }

    pub fn incorporate(&mut self, info: &TcpInfo) {
        self.max_path_mtu = self.max_path_mtu.max(info.pmtu.into());
        self.max_send_mss = self.max_send_mss.max(info.snd_mss.into());
        self.max_recv_mss = self.max_recv_mss.max(info.rcv_mss.into());
        // https://lkml.iu.edu/hypermail/linux/kernel/1705.0/01790.html
        self.total_retransmissions += u64::from(info.total_retrans);
        self.total_reorderings += u64::from(info.reordering);

        self.rtt_measurements += 1;
        self.average_rtt += (f64::from(info.rtt) - self.average_rtt) / self.rtt_measurements as f64;
        self.cwnd_measurements += 1;
        self.average_cwnd +=
            (f64::from(info.snd_cwnd) - self.average_cwnd) / self.cwnd_measurements as f64;
    }

    /// How many polls were folded in.
    pub fn measurements(&self) -> u64 {
        self.rtt_measurements
    }
}

impl fmt::Display for ExtendedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Extended Statistics:")?;
        writeln!(f, "\tMaximum Path MTU: {}", self.max_path_mtu)?;
        writeln!(f, "\tMaximum Send MSS: {}", self.max_send_mss)?;
        writeln!(f, "\tMaximum Recv MSS: {}", self.max_recv_mss)?;
        writeln!(f, "\tTotal Retransmissions: {}", self.total_retransmissions)?;
        writeln!(f, "\tTotal Reorderings: {}", self.total_reorderings)?;
        writeln!(f, "\tAverage RTT: {}", self.average_rtt)?;
        writeln!(f, "\tAverage Cwnd: {}", self.average_cwnd)
    }
}
