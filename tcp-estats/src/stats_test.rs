use std::{
    net::{TcpListener, TcpStream, UdpSocket},
    os::unix::io::AsRawFd,
};

use rand::Rng;

use super::{ConnectionHandle, ExtendedStats, Security, StatsError, TcpInfo, Transport};

fn info(rtt: u32, snd_cwnd: u32) -> TcpInfo {
    TcpInfo {
        pmtu: 1500,
        snd_mss: 1448,
        rcv_mss: 536,
        total_retrans: 2,
        reordering: 3,
        rtt,
        snd_cwnd,
    }
}

fn loopback_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (server, _) = listener.accept().unwrap();
    (client, server)
}

#[test]
fn averages_match_arithmetic_mean() {
    let mut rng = rand::thread_rng();
    let mut stats = ExtendedStats::default();
    let (mut rtt_sum, mut cwnd_sum) = (0.0, 0.0);
    for n in 1..=200u32 {
        let (rtt, cwnd) = (rng.gen_range(0..2_000_000), rng.gen_range(1..10_000));
        rtt_sum += f64::from(rtt);
        cwnd_sum += f64::from(cwnd);
        stats.incorporate(&info(rtt, cwnd));

        let n = f64::from(n);
        assert!((stats.average_rtt - rtt_sum / n).abs() <= 1e-6 * (rtt_sum / n).max(1.0));
        assert!((stats.average_cwnd - cwnd_sum / n).abs() <= 1e-6 * (cwnd_sum / n).max(1.0));
    }
    assert_eq!(stats.measurements(), 200);
}

#[test]
fn maxima_never_decrease() {
    let mut rng = rand::thread_rng();
    let mut stats = ExtendedStats::default();
    let mut previous = stats.clone();
    for _ in 0..500 {
        let observed = TcpInfo {
            pmtu: rng.gen_range(0..9000),
            snd_mss: rng.gen_range(0..9000),
            rcv_mss: rng.gen_range(0..9000),
            ..TcpInfo::default()
        };
        stats.incorporate(&observed);
        assert!(stats.max_path_mtu >= previous.max_path_mtu);
        assert!(stats.max_send_mss >= previous.max_send_mss);
        assert!(stats.max_recv_mss >= previous.max_recv_mss);
        assert!(stats.max_path_mtu >= u64::from(observed.pmtu));
        previous = stats.clone();
    }
}

#[test]
fn counters_are_summed_per_poll() {
    let mut stats = ExtendedStats::default();
    stats.incorporate(&info(100, 10));
    stats.incorporate(&info(300, 30));
    assert_eq!(stats.total_retransmissions, 4);
    assert_eq!(stats.total_reorderings, 6);
    assert_eq!(stats.average_rtt, 200.0);
    assert_eq!(stats.average_cwnd, 20.0);
}

#[test]
fn plain_connection_is_rejected_without_side_effects() {
    let (client, _server) = loopback_pair();
    let (handle, _lease) = ConnectionHandle::register(
        client.as_raw_fd(),
        Security::Plain,
        Transport::Stream,
        client.peer_addr().ok(),
    );

    let mut stats = ExtendedStats::default();
    stats.incorporate(&info(500, 10));
    let before = stats.clone();

    let err = stats.incorporate_connection_stats(&handle).unwrap_err();
    assert!(matches!(err, StatsError::NotSecureTransport));
    assert_eq!(stats, before);
}

#[test]
fn datagram_socket_is_rejected() {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let (handle, _lease) =
        ConnectionHandle::register(socket.as_raw_fd(), Security::Tls, Transport::Datagram, None);

    let mut stats = ExtendedStats::default();
    let err = stats.incorporate_connection_stats(&handle).unwrap_err();
    assert!(matches!(err, StatsError::NotStreamTransport));
    assert_eq!(stats, ExtendedStats::default());
}

#[test]
fn live_socket_is_polled() {
    let (client, _server) = loopback_pair();
    let (handle, lease) = ConnectionHandle::register(
        client.as_raw_fd(),
        Security::Tls,
        Transport::Stream,
        client.peer_addr().ok(),
    );

    let mut stats = ExtendedStats::default();
    match stats.incorporate_connection_stats(&handle) {
        Ok(()) => {
            assert!(super::extended_stats_available());
            assert_eq!(stats.measurements(), 1);
            assert!(stats.max_send_mss > 0);
            assert!(stats.average_cwnd > 0.0);
        }
        Err(StatsError::PlatformUnsupported) => assert!(!super::extended_stats_available()),
        Err(err) => panic!("unexpected error {err}"),
    }

    lease.release();
    let before = stats.clone();
    let err = stats.incorporate_connection_stats(&handle).unwrap_err();
    if super::extended_stats_available() {
        assert!(matches!(err, StatsError::Closed));
    }
    assert_eq!(stats, before);
}

#[test]
fn repr_lists_every_aggregate() {
    let mut stats = ExtendedStats::default();
    stats.incorporate(&info(250, 12));
    let repr = stats.to_string();
    assert!(repr.starts_with("Extended Statistics:\n"));
    assert!(repr.contains("\tMaximum Path MTU: 1500\n"));
    assert!(repr.contains("\tMaximum Send MSS: 1448\n"));
    assert!(repr.contains("\tMaximum Recv MSS: 536\n"));
    assert!(repr.contains("\tTotal Retransmissions: 2\n"));
    assert!(repr.contains("\tTotal Reorderings: 3\n"));
    assert!(repr.contains("\tAverage RTT: 250\n"));
    assert!(repr.contains("\tAverage Cwnd: 12\n"));
}
