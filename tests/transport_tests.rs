//! 전송 세션 통합 테스트
//!
//! 대부분 가상 네트워크([`MemoryNetwork`]) 위에서 tokio 시계를 멈춘 채로 돌린다.
//! 두 세션을 한 태스크에서 번갈아 update 하면서 데이터를 주고받는다.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use ffrdp::frame::{Frame, FRAME_TYPE_PLAIN};
use ffrdp::{Config, DatagramSocket, LinkConditions, MemoryNetwork, Role, Transport};

type MemoryTransport = Transport<ffrdp::MemorySocket>;

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// 서버(피어 미지정)와 클라이언트 세션 생성
fn session_pair(
    conditions: LinkConditions,
    server_config: Config,
    client_config: Config,
) -> (MemoryTransport, MemoryTransport, MemoryNetwork) {
    let network = MemoryNetwork::new(conditions);
    let server_sock = network.bind(addr(9000)).unwrap();
    let client_sock = network.bind(addr(9001)).unwrap();

    let server = Transport::with_socket(server_sock, Role::Server, None, server_config).unwrap();
    let client =
        Transport::with_socket(client_sock, Role::Client, Some(addr(9000)), client_config).unwrap();
    (client, server, network)
}

fn drain<S: DatagramSocket>(transport: &mut Transport<S>, sink: &mut Vec<u8>) {
    let mut buf = [0u8; 4096];
    loop {
        let n = transport.recv(&mut buf);
        if n == 0 {
            break;
        }
        sink.extend_from_slice(&buf[..n]);
    }
}

/// 클라이언트에서 서버로 `data`를 모두 보내고 서버가 받은 바이트 반환
///
/// 매 라운드마다 `inspect`로 클라이언트 상태를 확인한다.
async fn transfer<S: DatagramSocket>(
    client: &mut Transport<S>,
    server: &mut Transport<S>,
    data: &[u8],
    max_rounds: usize,
    mut inspect: impl FnMut(&Transport<S>),
) -> Vec<u8> {
    assert_eq!(client.send(data).unwrap(), data.len());
    client.flush();

    let mut received = Vec::with_capacity(data.len());
    for _ in 0..max_rounds {
        client.update().await;
        server.update().await;
        drain(server, &mut received);
        inspect(client);

        if received.len() == data.len() && client.pending_frames() == 0 {
            break;
        }
    }
    received
}

// ---------------------------------------------------------------------------
// 손실 없는 링크
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_lossless_transfer_in_order() {
    let (mut client, mut server, _net) =
        session_pair(LinkConditions::default(), Config::default(), Config::default());
    let data = payload(150_000);

    let received = transfer(&mut client, &mut server, &data, 1000, |_| {}).await;

    assert_eq!(received.len(), data.len());
    assert!(received == data, "payload corrupted or reordered");
    assert_eq!(server.peer(), Some(addr(9001)));

    let stats = client.stats();
    assert_eq!(stats.send_bytes, data.len() as u64);
    assert_eq!(stats.resend_rto, 0);
    assert_eq!(server.stats().recv_bytes, data.len() as u64);
    assert!(client.rto() <= Duration::from_millis(100));
    assert!(!client.is_dead());
}

// ---------------------------------------------------------------------------
// 손실 링크: 재전송과 혼잡제어
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_lossy_link_delivers_everything() {
    let conditions = LinkConditions {
        drop_every: Some(5),
        ..LinkConditions::default()
    };
    let config = Config::default();
    let (min_cwnd, max_cwnd) = (config.min_cwnd, config.max_cwnd);
    let (mut client, mut server, net) = session_pair(conditions, config.clone(), config);
    let data = payload(120_000);

    let received = transfer(&mut client, &mut server, &data, 10_000, |c| {
        assert!(
            (min_cwnd..=max_cwnd).contains(&c.cwnd()),
            "cwnd out of range: {}",
            c.cwnd()
        );
    })
    .await;

    assert!(received == data, "payload corrupted or incomplete");
    assert!(net.dropped() > 0);

    let stats = client.stats();
    assert!(stats.resend_rto + stats.resend_fast > 0);
    assert_eq!(stats.send_bytes, data.len() as u64);
}

#[tokio::test(start_paused = true)]
async fn test_fec_recovers_lost_frame() {
    // 첫 버스트에서 7번째 데이터그램(두 번째 그룹의 마지막 데이터 프레임)이 버려짐
    let conditions = LinkConditions {
        drop_every: Some(7),
        ..LinkConditions::default()
    };
    let config = Config::default().with_fec(4);
    let (mut client, mut server, _net) = session_pair(conditions, config.clone(), config);
    let data = payload(100_000);

    let received = transfer(&mut client, &mut server, &data, 10_000, |_| {}).await;

    assert!(received == data, "payload corrupted or incomplete");
    let stats = server.stats();
    assert!(stats.fec_ok >= 1, "no frame recovered: {}", stats.summary());
    assert!(stats.fec_rx_full > 0);
    assert!(client.stats().fec_tx_full > 0);
}

// ---------------------------------------------------------------------------
// 피어 사망 판정
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_dead_after_timeout_on_blackhole() {
    let conditions = LinkConditions {
        blackhole: true,
        ..LinkConditions::default()
    };
    let (mut client, _server, _net) =
        session_pair(conditions, Config::default(), Config::default());

    client.send(&payload(3000)).unwrap();
    let start = Instant::now();

    while start.elapsed() < Duration::from_secs(4) {
        client.update().await;
    }
    assert!(!client.is_dead());
    assert!(client.stats().resend_rto > 0);

    while start.elapsed() < Duration::from_millis(5100) {
        client.update().await;
    }
    assert!(client.is_dead());
    assert_eq!(client.rto(), client.config().max_rto);
}

#[tokio::test(start_paused = true)]
async fn test_alive_with_timely_acks() {
    let (mut client, mut server, _net) =
        session_pair(LinkConditions::default(), Config::default(), Config::default());
    let chunk = payload(64);
    let mut received = Vec::new();
    let start = Instant::now();

    while start.elapsed() < Duration::from_secs(6) {
        client.send(&chunk).unwrap();
        client.flush();
        client.update().await;
        server.update().await;
        drain(&mut server, &mut received);
        assert!(!client.is_dead());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!received.is_empty());
    assert!(!server.is_dead());
}

// ---------------------------------------------------------------------------
// 서버 피어 학습
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_server_ignores_foreign_sender() {
    let (mut client, mut server, net) =
        session_pair(LinkConditions::default(), Config::default(), Config::default());
    let intruder = net.bind(addr(9002)).unwrap();

    client.send(b"hi").unwrap();
    client.flush();
    client.update().await;
    server.update().await;
    assert_eq!(server.peer(), Some(addr(9001)));

    // 다음 시퀀스로 위장한 데이터
    let forged = Frame::new(1, FRAME_TYPE_PLAIN, Bytes::from_static(b"evil")).encode();
    intruder.try_send_to(&forged, addr(9000)).unwrap();
    server.update().await;

    assert_eq!(server.stats().foreign_datagrams, 1);
    assert_eq!(server.peer(), Some(addr(9001)));

    let mut received = Vec::new();
    drain(&mut server, &mut received);
    assert_eq!(received, b"hi");
}

// ---------------------------------------------------------------------------
// 수신 버퍼 백프레셔
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_receive_window_backpressure() {
    let server_config = Config {
        recv_buffer_size: 4 * ffrdp::DEFAULT_MSS,
        ..Config::default()
    };
    let (mut client, mut server, _net) =
        session_pair(LinkConditions::default(), server_config, Config::default());
    let data = payload(40 * ffrdp::DEFAULT_MSS);
    client.send(&data).unwrap();

    // 애플리케이션이 읽지 않는 동안 링버퍼만 채워지고 윈도우가 닫힘
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(1500) {
        client.update().await;
        server.update().await;
    }
    assert_eq!(server.readable_bytes(), 4 * ffrdp::DEFAULT_MSS);
    assert_eq!(client.swnd(), 0);
    assert!(client.pending_frames() > 0);
    assert!(client.stats().send_query >= 1);
    assert!(!client.is_dead());

    let mut received = Vec::new();
    for _ in 0..2000 {
        client.update().await;
        server.update().await;
        drain(&mut server, &mut received);
        if received.len() == data.len() && client.pending_frames() == 0 {
            break;
        }
    }
    assert!(received == data, "payload corrupted or incomplete");
}

// ---------------------------------------------------------------------------
// 유휴 flush
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_partial_frame_sent_after_flush_timeout() {
    let (mut client, mut server, _net) =
        session_pair(LinkConditions::default(), Config::default(), Config::default());
    client.send(b"0123456789").unwrap();

    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(300) {
        client.update().await;
        server.update().await;
    }
    assert_eq!(client.pending_frames(), 0);
    assert_eq!(server.readable_bytes(), 0);

    while start.elapsed() < Duration::from_millis(700) {
        client.update().await;
        server.update().await;
    }
    let mut received = Vec::new();
    drain(&mut server, &mut received);
    assert_eq!(received, b"0123456789");
}

// ---------------------------------------------------------------------------
// 실제 UDP 루프백
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_udp_loopback_transfer() {
    let mut server = Transport::listen(addr(0), Config::default()).unwrap();
    let server_addr = server.local_addr().unwrap();
    let mut client = Transport::connect(server_addr, Config::default()).unwrap();
    let data = payload(50_000);

    let received = transfer(&mut client, &mut server, &data, 5000, |_| {}).await;

    assert!(received == data, "payload corrupted or incomplete");
    assert!(server.peer().is_some());
}
