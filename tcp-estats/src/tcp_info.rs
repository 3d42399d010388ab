use std::{io, os::unix::io::RawFd};

/// Point-in-time subset of the kernel `tcp_info`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TcpInfo {
    pub pmtu: u32,
    pub snd_mss: u32,
    pub rcv_mss: u32,
    /// Cumulative since the connection was established
    pub total_retrans: u32,
    pub reordering: u32,
    /// Smoothed estimate, microseconds
    pub rtt: u32,
    /// Segments
    pub snd_cwnd: u32,
}

pub const fn available() -> bool {
    cfg!(any(target_os = "linux", target_os = "android"))
}

#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn query(fd: RawFd) -> io::Result<TcpInfo> {
    use std::mem;

    // The kernel copies `min(len, sizeof(struct tcp_info))` bytes,
    // so the prefix up to `total_retrans` is enough and stable since 2.6.
    #[repr(C)]
    #[derive(Default)]
    #[allow(dead_code)]
    struct RawTcpInfo {
        tcpi_state: u8,
        tcpi_ca_state: u8,
        tcpi_retransmits: u8,
        tcpi_probes: u8,
        tcpi_backoff: u8,
        tcpi_options: u8,
        tcpi_wscale: u8,
        tcpi_flags: u8,

        tcpi_rto: u32,
        tcpi_ato: u32,
        tcpi_snd_mss: u32,
        tcpi_rcv_mss: u32,

        tcpi_unacked: u32,
        tcpi_sacked: u32,
        tcpi_lost: u32,
        tcpi_retrans: u32,
        tcpi_fackets: u32,

        tcpi_last_data_sent: u32,
        tcpi_last_ack_sent: u32,
        tcpi_last_data_recv: u32,
        tcpi_last_ack_recv: u32,

        tcpi_pmtu: u32,
        tcpi_rcv_ssthresh: u32,
        tcpi_rtt: u32,
        tcpi_rttvar: u32,
        tcpi_snd_ssthresh: u32,
        tcpi_snd_cwnd: u32,
        tcpi_advmss: u32,
        tcpi_reordering: u32,

        tcpi_rcv_rtt: u32,
        tcpi_rcv_space: u32,

        tcpi_total_retrans: u32,
    }

    let mut raw = RawTcpInfo::default();
    let mut len = mem::size_of::<RawTcpInfo>() as libc::socklen_t;
    let r = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_TCP,
            libc::TCP_INFO,
            &mut raw as *mut RawTcpInfo as *mut libc::c_void,
            &mut len,
        )
    };
    if r != 0 {
        return Err(io::Error::last_os_error());
    }
    if (len as usize) < mem::size_of::<RawTcpInfo>() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("short tcp_info: {len} bytes"),
        ));
    }

    Ok(TcpInfo {
        pmtu: raw.tcpi_pmtu,
        snd_mss: raw.tcpi_snd_mss,
        rcv_mss: raw.tcpi_rcv_mss,
        total_retrans: raw.tcpi_total_retrans,
        reordering: raw.tcpi_reordering,
        rtt: raw.tcpi_rtt,
        snd_cwnd: raw.tcpi_snd_cwnd,
    })
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn query(fd: RawFd) -> io::Result<TcpInfo> {
    let _ = fd;
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "tcp_info is not supported on this platform",
    ))
}
