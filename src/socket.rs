//! 데이터그램 소켓 추상화
//!
//! [`Transport`](crate::Transport)는 이 트레잇만 보고 동작한다.
//! - [`UdpDatagram`]: 실제 UDP 소켓 (socket2로 버퍼 설정 후 tokio에 등록)
//! - [`MemorySocket`]: 프로세스 내부 가상 네트워크 (지연, 손실, 차단 주입)

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::debug;

use crate::config::{Config, Role};
use crate::Result;

/// 논블로킹 데이터그램 소켓
pub trait DatagramSocket: Send + Sync {
    /// 수신 가능해질 때까지 대기 등록
    fn poll_readable(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>>;

    /// 즉시 송신 (블로킹 없음)
    fn try_send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// 즉시 수신, 대기 중인 데이터그램이 없으면 `Ok(None)`
    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// tokio UDP 소켓
#[derive(Debug)]
pub struct UdpDatagram {
    socket: UdpSocket,
}

impl UdpDatagram {
    /// 역할에 맞게 바인드
    ///
    /// 서버는 `addr`에, 클라이언트는 같은 주소 체계의 임의 포트에 바인드한다.
    /// tokio 런타임 안에서 호출해야 한다.
    pub fn open(addr: SocketAddr, role: Role, config: &Config) -> Result<Self> {
        let bind_addr = match (role, addr) {
            (Role::Server, _) => addr,
            (Role::Client, SocketAddr::V4(_)) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            (Role::Client, SocketAddr::V6(_)) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        Self::bind(bind_addr, config)
    }

    /// 지정 주소에 바인드
    pub fn bind(addr: SocketAddr, config: &Config) -> Result<Self> {
        let domain = match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;

        // 커널이 요청값을 조정할 수 있으므로 실패해도 진행
        if let Err(e) = socket.set_send_buffer_size(config.udp_send_buffer) {
            debug!("SO_SNDBUF {} 설정 실패: {}", config.udp_send_buffer, e);
        }
        if let Err(e) = socket.set_recv_buffer_size(config.udp_recv_buffer) {
            debug!("SO_RCVBUF {} 설정 실패: {}", config.udp_recv_buffer, e);
        }

        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;

        let socket = UdpSocket::from_std(socket.into())?;
        Ok(Self { socket })
    }
}

impl DatagramSocket for UdpDatagram {
    fn poll_readable(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.socket.poll_recv_ready(cx)
    }

    fn try_send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.socket.try_send_to(buf, target)
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket.try_recv_from(buf) {
            Ok(received) => Ok(Some(received)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// 가상 링크 상태
#[derive(Debug, Clone)]
pub struct LinkConditions {
    /// 단방향 지연
    pub latency: Duration,

    /// 무작위 손실 확률 (0.0 ~ 1.0)
    pub loss_rate: f64,

    /// N번째 데이터그램마다 버림 (결정적 손실)
    pub drop_every: Option<u64>,

    /// 모든 데이터그램 차단
    pub blackhole: bool,

    /// 손실 난수 시드
    pub seed: u64,
}

impl Default for LinkConditions {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            loss_rate: 0.0,
            drop_every: None,
            blackhole: false,
            seed: 0x5EED,
        }
    }
}

impl LinkConditions {
    /// 지연만 있는 링크
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct InFlight {
    deliver_at: Instant,
    from: SocketAddr,
    payload: Bytes,
}

#[derive(Debug, Default)]
struct Endpoint {
    inbox: VecDeque<InFlight>,
    waker: Option<Waker>,
}

impl Endpoint {
    fn has_due(&self, now: Instant) -> bool {
        self.inbox.front().map_or(false, |d| d.deliver_at <= now)
    }
}

#[derive(Debug)]
struct Network {
    conditions: LinkConditions,
    rng: StdRng,
    sent: u64,
    dropped: u64,
    endpoints: HashMap<SocketAddr, Endpoint>,
}

impl Network {
    fn should_drop(&mut self) -> bool {
        self.sent += 1;
        if self.conditions.blackhole {
            return true;
        }
        if let Some(n) = self.conditions.drop_every {
            if n > 0 && self.sent % n == 0 {
                return true;
            }
        }
        self.conditions.loss_rate > 0.0 && self.rng.gen_bool(self.conditions.loss_rate.min(1.0))
    }
}

/// 프로세스 내부 가상 네트워크
///
/// 바인드된 주소 사이에서 데이터그램을 전달하며 [`LinkConditions`]를 모든 방향에 적용한다.
#[derive(Debug, Clone)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<Network>>,
}

impl MemoryNetwork {
    pub fn new(conditions: LinkConditions) -> Self {
        let rng = StdRng::seed_from_u64(conditions.seed);
        Self {
            inner: Arc::new(Mutex::new(Network {
                conditions,
                rng,
                sent: 0,
                dropped: 0,
                endpoints: HashMap::new(),
            })),
        }
    }

    /// 주소에 가상 소켓 바인드
    pub fn bind(&self, addr: SocketAddr) -> io::Result<MemorySocket> {
        let mut network = self.inner.lock();
        if network.endpoints.contains_key(&addr) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{} 이미 사용 중", addr),
            ));
        }
        network.endpoints.insert(addr, Endpoint::default());
        Ok(MemorySocket {
            network: self.inner.clone(),
            addr,
        })
    }

    /// 링크 상태 변경 (이미 전송 중인 데이터그램에는 영향 없음)
    pub fn set_conditions(&self, conditions: LinkConditions) {
        self.inner.lock().conditions = conditions;
    }

    pub fn conditions(&self) -> LinkConditions {
        self.inner.lock().conditions.clone()
    }

    /// 지금까지 버려진 데이터그램 수
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }
}

/// [`MemoryNetwork`]에 바인드된 가상 소켓
#[derive(Debug)]
pub struct MemorySocket {
    network: Arc<Mutex<Network>>,
    addr: SocketAddr,
}

impl MemorySocket {
    /// 두 주소를 잇는 네트워크와 소켓 쌍 생성
    pub fn pair(
        a: SocketAddr,
        b: SocketAddr,
        conditions: LinkConditions,
    ) -> io::Result<(MemorySocket, MemorySocket, MemoryNetwork)> {
        let network = MemoryNetwork::new(conditions);
        let first = network.bind(a)?;
        let second = network.bind(b)?;
        Ok((first, second, network))
    }
}

impl DatagramSocket for MemorySocket {
    fn poll_readable(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut network = self.network.lock();
        let Some(endpoint) = network.endpoints.get_mut(&self.addr) else {
            return Poll::Ready(Err(io::ErrorKind::NotConnected.into()));
        };
        if endpoint.has_due(Instant::now()) {
            return Poll::Ready(Ok(()));
        }
        endpoint.waker = Some(cx.waker().clone());
        Poll::Pending
    }

    fn try_send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        let mut network = self.network.lock();
        if network.should_drop() {
            network.dropped += 1;
            return Ok(buf.len());
        }

        let deliver_at = Instant::now() + network.conditions.latency;
        // 없는 주소로의 송신은 UDP처럼 조용히 사라짐
        if let Some(endpoint) = network.endpoints.get_mut(&target) {
            endpoint.inbox.push_back(InFlight {
                deliver_at,
                from: self.addr,
                payload: Bytes::copy_from_slice(buf),
            });
            if let Some(waker) = endpoint.waker.take() {
                waker.wake();
            }
        }
        Ok(buf.len())
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        let mut network = self.network.lock();
        let Some(endpoint) = network.endpoints.get_mut(&self.addr) else {
            return Err(io::ErrorKind::NotConnected.into());
        };
        if !endpoint.has_due(Instant::now()) {
            return Ok(None);
        }
        let Some(datagram) = endpoint.inbox.pop_front() else {
            return Ok(None);
        };

        // 버퍼보다 긴 데이터그램은 잘림
        let n = datagram.payload.len().min(buf.len());
        buf[..n].copy_from_slice(&datagram.payload[..n]);
        Ok(Some((n, datagram.from)))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}

impl Drop for MemorySocket {
    fn drop(&mut self) {
        self.network.lock().endpoints.remove(&self.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_delivery_with_latency() {
        let (a, b, _net) =
            MemorySocket::pair(addr(1), addr(2), LinkConditions::with_latency(Duration::from_millis(20)))
                .unwrap();
        a.try_send_to(b"ping", addr(2)).unwrap();

        let mut buf = [0u8; 16];
        assert!(b.try_recv_from(&mut buf).unwrap().is_none());

        tokio::time::advance(Duration::from_millis(20)).await;
        let (n, from) = b.try_recv_from(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, addr(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_every_nth() {
        let conditions = LinkConditions {
            drop_every: Some(3),
            ..LinkConditions::default()
        };
        let (a, b, net) = MemorySocket::pair(addr(1), addr(2), conditions).unwrap();
        for i in 0..9u8 {
            a.try_send_to(&[i], addr(2)).unwrap();
        }

        let mut buf = [0u8; 4];
        let mut received = Vec::new();
        while let Some((_, _)) = b.try_recv_from(&mut buf).unwrap() {
            received.push(buf[0]);
        }
        assert_eq!(received, vec![0, 1, 3, 4, 6, 7]);
        assert_eq!(net.dropped(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blackhole_toggle() {
        let (a, b, net) = MemorySocket::pair(addr(1), addr(2), LinkConditions::default()).unwrap();
        net.set_conditions(LinkConditions {
            blackhole: true,
            ..LinkConditions::default()
        });
        a.try_send_to(b"lost", addr(2)).unwrap();

        let mut buf = [0u8; 8];
        assert!(b.try_recv_from(&mut buf).unwrap().is_none());

        net.set_conditions(LinkConditions::default());
        a.try_send_to(b"ok", addr(2)).unwrap();
        assert_eq!(b.try_recv_from(&mut buf).unwrap().map(|(n, _)| n), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_readable_wakes_on_send() {
        let (a, b, _net) = MemorySocket::pair(addr(1), addr(2), LinkConditions::default()).unwrap();
        let reader = tokio::spawn(async move {
            std::future::poll_fn(|cx| b.poll_readable(cx)).await.unwrap();
            let mut buf = [0u8; 8];
            b.try_recv_from(&mut buf).unwrap().map(|(n, _)| n)
        });
        tokio::task::yield_now().await;
        a.try_send_to(b"wake", addr(2)).unwrap();
        assert_eq!(reader.await.unwrap(), Some(4));
    }

    #[test]
    fn test_rebind_same_address_fails() {
        let net = MemoryNetwork::new(LinkConditions::default());
        let _first = net.bind(addr(7)).unwrap();
        assert!(net.bind(addr(7)).is_err());
    }

    #[tokio::test]
    async fn test_udp_loopback() {
        let config = Config::default();
        let server = UdpDatagram::bind("127.0.0.1:0".parse().unwrap(), &config).unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = UdpDatagram::open(server_addr, Role::Client, &config).unwrap();

        client.try_send_to(b"hello", server_addr).unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = loop {
            std::future::poll_fn(|cx| server.poll_readable(cx)).await.unwrap();
            if let Some(received) = server.try_recv_from(&mut buf).unwrap() {
                break received;
            }
        };
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(from.port(), client.local_addr().unwrap().port());
    }
}
