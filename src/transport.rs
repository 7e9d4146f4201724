//! FFRDP 전송 엔진
//!
//! 호출측은 `send`/`recv`로 바이트를 주고받고 주기적으로 [`Transport::update`]를 호출한다.
//! update 한 번에 다음을 순서대로 처리한다.
//!
//! 1. 채워지지 않은 프레임 강제 큐잉 (flush 요청 또는 유휴 타임아웃)
//! 2. 송신 큐 앞에서 cwnd개까지 최초 전송 / 타임아웃 재전송 / 빠른 재전송
//! 3. 소켓 readable 대기 후 도착한 데이터그램 모두 처리
//! 4. 연속된 프레임을 수신 링버퍼로 옮기고 선택적 ACK 전송
//! 5. 받은 ACK로 송신 큐 정리, RTT/cwnd 갱신

use std::future::poll_fn;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, info_span, trace, warn, Instrument, Span};

use crate::config::{Config, Role};
use crate::congestion::{CongestionController, CongestionEvent};
use crate::fec::{FecDecoder, FecEncoder, FecOutcome};
use crate::frame::{
    query_frame, AckFrame, Frame, FrameState, FrameType, ACK_MASK_BITS, FRAME_HEADER_SIZE,
    FRAME_TYPE_PLAIN,
};
use crate::queue::FrameQueue;
use crate::ringbuf::RingBuffer;
use crate::rtt::RttEstimator;
use crate::seq::{add, distance, next};
use crate::socket::{DatagramSocket, UdpDatagram};
use crate::stats::TransferStats;
use crate::{Error, Result};

/// 품질 저하 판정 RTO
const QOS_DEGRADE_RTO: Duration = Duration::from_millis(100);

/// 품질 저하 판정 대기 프레임 수
const QOS_DEGRADE_OUTSTANDING: usize = 25;

/// 품질 향상 판정 RTO
const QOS_IMPROVE_RTO: Duration = Duration::from_millis(55);

/// 품질 향상 판정 대기 프레임 수
const QOS_IMPROVE_OUTSTANDING: usize = 3;

/// 품질 향상 판정 재전송 비율 (%)
const QOS_IMPROVE_RESEND_RATIO: u64 = 5;

/// 적응형 비트레이트용 품질 신호
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    /// RTO가 높고 대기 프레임이 많음
    Degrade,
    Steady,
    /// RTO가 낮고 대기 프레임과 재전송이 적음
    Improve,
}

/// 한 번의 수신 처리에서 모은 결과
#[derive(Debug)]
struct Received {
    got_data: bool,
    got_query: bool,
    send_una: u32,
    send_mask: u32,
}

/// FFRDP 전송 세션
pub struct Transport<S: DatagramSocket = UdpDatagram> {
    socket: S,
    role: Role,

    /// 서버 모드에서는 첫 데이터그램의 송신 주소로 학습
    peer: Option<SocketAddr>,

    config: Config,
    span: Span,

    /// 채우는 중인 송신 프레임 페이로드
    pending: Option<BytesMut>,
    pending_since: Instant,
    flush_requested: bool,

    /// 다음에 부여할 송신 시퀀스
    send_seq: u32,
    send_queue: FrameQueue,

    /// 다음에 기대하는 수신 시퀀스
    recv_seq: u32,
    recv_queue: FrameQueue,
    recv_buffer: RingBuffer,

    /// 피어가 알려준 수신 윈도우 (프레임)
    swnd: u32,

    rtt: RttEstimator,
    congestion: CongestionController,
    fec_encoder: Option<FecEncoder>,
    fec_decoder: FecDecoder,

    /// 마지막 QUERY 전송 시각 (아직 없으면 None, 첫 QUERY는 바로 나감)
    last_query_at: Option<Instant>,
    last_ack_at: Instant,

    stats: TransferStats,
    scratch: Vec<u8>,
}

impl Transport<UdpDatagram> {
    /// UDP 소켓을 열고 세션 생성
    ///
    /// 서버는 `addr`에 바인드하고, 클라이언트는 `addr`을 서버 주소로 사용한다.
    /// tokio 런타임 안에서 호출해야 한다.
    pub fn open(addr: SocketAddr, role: Role, config: Config) -> Result<Self> {
        config.validate()?;
        let socket = UdpDatagram::open(addr, role, &config)?;
        let peer = match role {
            Role::Server => None,
            Role::Client => Some(addr),
        };
        Self::with_socket(socket, role, peer, config)
    }

    /// 서버 모드로 열기
    pub fn listen(addr: SocketAddr, config: Config) -> Result<Self> {
        Self::open(addr, Role::Server, config)
    }

    /// 클라이언트 모드로 열기
    pub fn connect(server: SocketAddr, config: Config) -> Result<Self> {
        Self::open(server, Role::Client, config)
    }
}

impl<S: DatagramSocket> Transport<S> {
    /// 이미 준비된 소켓으로 세션 생성
    pub fn with_socket(
        socket: S,
        role: Role,
        peer: Option<SocketAddr>,
        config: Config,
    ) -> Result<Self> {
        config.validate()?;

        let local = socket.local_addr()?;
        let span = info_span!("ffrdp", role = ?role, local = %local);
        let now = Instant::now();

        let fec_encoder = config
            .fec_enabled()
            .then(|| FecEncoder::new(config.fec_redundancy, config.mss));

        {
            let _enter = span.enter();
            info!(
                "FFRDP {:?} opened on {} (peer: {:?}, fec: {})",
                role, local, peer, config.fec_redundancy
            );
        }

        Ok(Self {
            role,
            peer,
            span,
            pending: None,
            pending_since: now,
            flush_requested: false,
            send_seq: 0,
            send_queue: FrameQueue::new(),
            recv_seq: 0,
            recv_queue: FrameQueue::new(),
            recv_buffer: RingBuffer::new(config.recv_buffer_size),
            swnd: (config.recv_buffer_size / config.mss) as u32,
            rtt: RttEstimator::new(config.min_rto, config.max_rto),
            congestion: CongestionController::new(
                config.min_cwnd,
                config.default_cwnd,
                config.max_cwnd,
            ),
            fec_encoder,
            fec_decoder: FecDecoder::new(config.mss),
            last_query_at: None,
            last_ack_at: now,
            stats: TransferStats::new(),
            scratch: vec![0u8; config.max_datagram_size() + 1],
            socket,
            config,
        })
    }

    /// 바이트를 MSS 단위 프레임으로 나눠 송신 큐에 넣음
    ///
    /// 서버가 아직 피어를 모르거나 필요한 프레임 수가 `max_wait_snd`를 넘으면
    /// 아무것도 넣지 않고 백프레셔 에러를 반환한다.
    pub fn send(&mut self, buf: &[u8]) -> Result<usize> {
        let span = self.span.clone();
        let _enter = span.enter();

        if self.peer.is_none() {
            self.stats.send_failed += 1;
            return Err(Error::NotConnected);
        }

        let mss = self.config.mss;
        let needed = (buf.len() + mss - 1) / mss;
        let queued = self.send_queue.len();
        if needed + queued > self.config.max_wait_snd {
            self.stats.send_failed += 1;
            trace!("송신 큐 가득 참: {} + {}", needed, queued);
            return Err(Error::SendQueueFull {
                needed,
                queued,
                limit: self.config.max_wait_snd,
            });
        }

        let mut rest = buf;
        while !rest.is_empty() {
            let full = {
                let pending = self
                    .pending
                    .get_or_insert_with(|| BytesMut::with_capacity(mss));
                let n = rest.len().min(mss - pending.len());
                pending.extend_from_slice(&rest[..n]);
                rest = &rest[n..];
                pending.len() == mss
            };

            if full {
                if let Some(payload) = self.pending.take() {
                    self.enqueue(payload.freeze(), self.config.fec_redundancy);
                }
            } else {
                self.pending_since = Instant::now();
            }
        }

        Ok(buf.len())
    }

    /// 수신 링버퍼에서 읽기 (없으면 0)
    pub fn recv(&mut self, buf: &mut [u8]) -> usize {
        let n = self.recv_buffer.read(buf);
        self.stats.recv_bytes += n as u64;
        n
    }

    /// 다음 update에서 채우는 중인 프레임을 즉시 큐에 넣도록 요청
    pub fn flush(&mut self) {
        self.flush_requested = true;
    }

    /// 한 틱 처리 (유일한 대기 지점)
    pub async fn update(&mut self) {
        let span = self.span.clone();
        self.tick().instrument(span).await
    }

    async fn tick(&mut self) {
        self.flush_pending(Instant::now());

        if let Some(peer) = self.peer {
            self.transmit(peer, Instant::now());
        }

        let readable = timeout(
            self.config.poll_timeout,
            poll_fn(|cx| self.socket.poll_readable(cx)),
        )
        .await;
        let received = match readable {
            Ok(Ok(())) => self.receive(),
            Ok(Err(e)) => {
                warn!("소켓 대기 에러: {}", e);
                self.idle()
            }
            Err(_) => self.idle(),
        };

        // recv로 공간이 생겨 밀려 있던 프레임을 옮길 수 있으면 윈도우 갱신 ACK도 보냄
        if received.got_data || received.got_query || self.head_deliverable() {
            self.deliver_and_ack();
        }
        self.process_ack(received.send_una, received.send_mask);
    }

    fn idle(&self) -> Received {
        Received {
            got_data: false,
            got_query: false,
            send_una: self.send_queue.front().map_or(0, |f| f.seq),
            send_mask: 0,
        }
    }

    fn head_deliverable(&self) -> bool {
        self.recv_queue.front().map_or(false, |head| {
            head.seq == self.recv_seq && head.payload_len() <= self.recv_buffer.free()
        })
    }

    fn enqueue(&mut self, payload: Bytes, group: u8) {
        let frame = Frame::new(self.send_seq, group, payload);
        self.send_seq = next(self.send_seq);
        self.send_queue.insert(frame);
    }

    fn flush_pending(&mut self, now: Instant) {
        let idle = now.saturating_duration_since(self.pending_since) > self.config.flush_timeout;
        if self.pending.is_some() && (idle || self.flush_requested) {
            if let Some(payload) = self.pending.take() {
                trace!("부분 프레임 flush: {} bytes", payload.len());
                self.enqueue(payload.freeze(), FRAME_TYPE_PLAIN);
            }
        }
        self.flush_requested = false;
    }

    fn transmit(&mut self, peer: SocketAddr, now: Instant) {
        let mut idx = 0;
        while idx < self.congestion.cwnd() as usize {
            let Some(frame) = self.send_queue.get(idx) else {
                break;
            };
            let state = frame.state;
            let expired = frame.deadline.map_or(false, |deadline| now > deadline);

            if state == FrameState::Fresh {
                if self.swnd == 0 {
                    let due = self.last_query_at.map_or(true, |last| {
                        now.saturating_duration_since(last) > self.config.query_cycle
                    });
                    if due {
                        if let Err(e) = self.socket.try_send_to(&query_frame(), peer) {
                            debug!("QUERY 전송 실패: {}", e);
                        }
                        self.last_query_at = Some(now);
                        self.stats.send_query += 1;
                    }
                    break;
                }

                if let Err(e) = self.transmit_frame(idx, peer) {
                    debug!("송신 실패: {}", e);
                    self.congestion.on_event(CongestionEvent::SendFailed);
                    break;
                }
                let rto = self.rtt.rto();
                if let Some(frame) = self.send_queue.get_mut(idx) {
                    frame.first_sent = Some(now);
                    frame.last_sent = Some(now);
                    frame.deadline = Some(now + rto);
                    frame.state = FrameState::Sent;
                }
                self.swnd -= 1;
                self.stats.send_first += 1;
            } else if matches!(state, FrameState::AwaitingFastResend { .. }) || expired {
                let fast = matches!(state, FrameState::AwaitingFastResend { .. });
                self.congestion.on_event(if fast {
                    CongestionEvent::FastResend
                } else {
                    CongestionEvent::AckTimeout
                });

                if let Err(e) = self.transmit_frame(idx, peer) {
                    debug!("재전송 실패: {}", e);
                    self.congestion.on_event(CongestionEvent::SendFailed);
                    break;
                }

                // 빠른 재전송은 타임아웃 이력까지 해제,
                // RTO가 이미 상한이면 다시 RTT 샘플을 받을 수 있게 둔다
                let next_state = if fast {
                    self.stats.resend_fast += 1;
                    FrameState::Sent
                } else if self.rtt.backoff() {
                    self.stats.reach_max_rto += 1;
                    self.stats.resend_rto += 1;
                    FrameState::Sent
                } else {
                    self.stats.resend_rto += 1;
                    FrameState::TimeoutResent
                };
                let rto = self.rtt.rto();
                if let Some(frame) = self.send_queue.get_mut(idx) {
                    trace!("재전송 seq={} fast={} rto={:?}", frame.seq, fast, rto);
                    frame.state = next_state;
                    frame.last_sent = Some(now);
                    frame.deadline = Some(now + rto);
                }
            }
            idx += 1;
        }
    }

    /// 송신 큐의 `idx`번째 프레임 전송 (FEC 적용)
    fn transmit_frame(&mut self, idx: usize, peer: SocketAddr) -> io::Result<()> {
        let Some(frame) = self.send_queue.get(idx) else {
            return Ok(());
        };
        let mut datagram = frame.encode();

        let parity = match self.fec_encoder.as_mut() {
            Some(encoder) if datagram.len() == self.config.max_datagram_size() => {
                self.stats.fec_tx_full += 1;
                encoder.encode(&mut datagram)
            }
            _ => {
                self.stats.fec_tx_short += 1;
                None
            }
        };

        send_datagram(&self.socket, &datagram, peer)?;

        if let Some(parity) = parity {
            match send_datagram(&self.socket, &parity, peer) {
                Ok(()) => self.stats.fec_tx_full += 1,
                Err(e) => debug!("FEC 패리티 전송 실패: {}", e),
            }
        }
        Ok(())
    }

    /// 도착한 데이터그램 모두 처리
    fn receive(&mut self) -> Received {
        let mut received = self.idle();
        let mut recv_una = self.recv_seq;
        let max_datagram = self.config.max_datagram_size();

        loop {
            let (len, from) = match self.socket.try_recv_from(&mut self.scratch) {
                Ok(Some(r)) => r,
                Ok(None) => break,
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => {
                    warn!("수신 에러: {}", e);
                    break;
                }
            };

            if self.role == Role::Server {
                match self.peer {
                    None => {
                        info!("클라이언트 연결: {}", from);
                        self.peer = Some(from);
                    }
                    Some(peer) if peer != from => {
                        self.stats.foreign_datagrams += 1;
                        continue;
                    }
                    Some(_) => {}
                }
            }

            if len == 0 || len > max_datagram {
                self.stats.malformed_datagrams += 1;
                continue;
            }

            match FrameType::from_byte(self.scratch[0]) {
                Some(FrameType::Data(_)) if len >= FRAME_HEADER_SIZE => {
                    let datagram = BytesMut::from(&self.scratch[..len]);
                    let Some(frame) = self.accept_data(datagram) else {
                        continue;
                    };
                    let dist = distance(frame.seq, recv_una);
                    if dist == 0 {
                        recv_una = next(recv_una);
                    }
                    if dist >= 0 {
                        self.recv_queue.insert(frame);
                    }
                    received.got_data = true;
                }
                Some(FrameType::Ack) => {
                    let Some(ack) = AckFrame::decode(&self.scratch[..len]) else {
                        self.stats.malformed_datagrams += 1;
                        continue;
                    };
                    let dist = distance(ack.una, received.send_una);
                    if dist >= 0 {
                        received.send_una = ack.una;
                        received.send_mask =
                            received.send_mask.checked_shr(dist as u32).unwrap_or(0) | ack.mask;
                        self.swnd = ack.window as u32;
                        self.last_ack_at = Instant::now();
                    }
                }
                Some(FrameType::Query) => received.got_query = true,
                _ => self.stats.malformed_datagrams += 1,
            }
        }

        received
    }

    /// FEC 처리 후 프레임 디코딩
    fn accept_data(&mut self, datagram: BytesMut) -> Option<Frame> {
        let datagram = match self.fec_decoder.decode(datagram) {
            FecOutcome::Short(d) => {
                self.stats.fec_rx_short += 1;
                d
            }
            FecOutcome::Member(d) => {
                self.stats.fec_rx_full += 1;
                d
            }
            FecOutcome::Recovered(d) => {
                self.stats.fec_rx_full += 1;
                self.stats.fec_ok += 1;
                d
            }
            FecOutcome::Redundant => {
                self.stats.fec_rx_full += 1;
                return None;
            }
            FecOutcome::Unrecoverable => {
                self.stats.fec_rx_full += 1;
                self.stats.fec_failed += 1;
                return None;
            }
        };

        let frame = Frame::decode(datagram, self.config.max_datagram_size())?;
        if frame.payload_len() > self.config.mss {
            self.stats.malformed_datagrams += 1;
            return None;
        }
        Some(frame)
    }

    /// 연속된 수신 프레임을 링버퍼로 옮기고 ACK 전송
    fn deliver_and_ack(&mut self) {
        while let Some(head) = self.recv_queue.front() {
            let dist = distance(head.seq, self.recv_seq);
            if dist > 0 || head.payload_len() > self.recv_buffer.free() {
                break;
            }
            if let Some(frame) = self.recv_queue.pop_front() {
                if dist == 0 {
                    self.recv_buffer.write(&frame.payload);
                    self.recv_seq = next(self.recv_seq);
                }
            }
        }

        let mut mask = 0u32;
        for frame in self.recv_queue.iter().take(ACK_MASK_BITS as usize + 1) {
            let dist = distance(frame.seq, self.recv_seq);
            if (1..=ACK_MASK_BITS).contains(&dist) {
                mask |= 1 << (dist - 1);
            }
        }

        let ack = AckFrame {
            una: self.recv_seq,
            mask,
            window: (self.recv_buffer.free() / self.config.mss).min(255) as u8,
        };
        if let Some(peer) = self.peer {
            if let Err(e) = self.socket.try_send_to(&ack.encode(), peer) {
                debug!("ACK 전송 실패: {}", e);
            }
        }
    }

    /// 받은 ACK로 송신 큐 정리
    fn process_ack(&mut self, send_una: u32, send_mask: u32) {
        let Some(head) = self.send_queue.front() else {
            return;
        };
        if distance(send_una, head.seq) <= 0 {
            return;
        }

        // 마스크 최상위 비트 다음, 비트가 없으면 una - 1
        let maxack = match send_mask.checked_ilog2() {
            Some(bit) => add(send_una, bit as i32 + 1),
            None => add(send_una, -1),
        };

        let now = Instant::now();
        let mut idx = 0;
        loop {
            let (seq, sent) = match self.send_queue.get(idx) {
                Some(frame) => (frame.seq, frame.state.is_sent()),
                None => break,
            };
            let dist = distance(seq, send_una);
            if dist > ACK_MASK_BITS || !sent {
                break;
            }

            if dist < 0 || (dist > 0 && send_mask & (1 << (dist - 1)) != 0) {
                if let Some(frame) = self.send_queue.remove(idx) {
                    self.retire(frame, now);
                }
                continue;
            }

            if distance(maxack, seq) > 0 {
                self.congestion.on_event(CongestionEvent::FastResend);
                if let Some(frame) = self.send_queue.get_mut(idx) {
                    frame.state = FrameState::AwaitingFastResend {
                        after_timeout: frame.state.is_timeout_resent(),
                    };
                }
            }
            idx += 1;
        }
    }

    fn retire(&mut self, frame: Frame, now: Instant) {
        self.stats.send_bytes += frame.payload_len() as u64;
        self.congestion.on_event(CongestionEvent::AckOk);

        if frame.state.is_rtt_sample() {
            if let Some(sent) = frame.last_sent {
                self.rtt.on_sample(now.saturating_duration_since(sent));
            }
        }
    }

    /// 피어 사망 여부
    ///
    /// 송신 큐 맨 앞 프레임이 전송된 적 있으면 최초 전송 후 경과 시간으로,
    /// 아직 못 보냈으면 (윈도우 0) 마지막 QUERY와 마지막 ACK 사이 간격으로 판정한다.
    pub fn is_dead(&self) -> bool {
        let Some(head) = self.send_queue.front() else {
            return false;
        };
        match head.first_sent {
            Some(first) if head.state.is_sent() => {
                Instant::now().saturating_duration_since(first) > self.config.dead_timeout
            }
            _ => self.last_query_at.map_or(false, |query| {
                query.saturating_duration_since(self.last_ack_at) > self.config.dead_timeout
            }),
        }
    }

    /// 품질 신호 계산 (재전송 카운터 초기화)
    pub fn qos(&mut self) -> Quality {
        let resend_ratio = self.stats.resend_ratio();
        self.stats.reset_resend();

        let rto = self.rtt.rto();
        let outstanding = self.send_queue.len();
        if rto > QOS_DEGRADE_RTO && outstanding > QOS_DEGRADE_OUTSTANDING {
            Quality::Degrade
        } else if rto < QOS_IMPROVE_RTO
            && outstanding < QOS_IMPROVE_OUTSTANDING
            && resend_ratio < QOS_IMPROVE_RESEND_RATIO
        {
            Quality::Improve
        } else {
            Quality::Steady
        }
    }

    /// 진단 정보 로그 출력
    ///
    /// `clear_history`면 1초 넘게 쌓인 카운터를 초기화한다.
    pub fn dump(&mut self, clear_history: bool) {
        let span = self.span.clone();
        let _enter = span.enter();

        let secs = self.stats.elapsed().as_secs().max(1);
        info!(
            "rtt latest: {:?}, smoothed: {:?}, dev: {:?}, rto: {:?}",
            self.rtt.latest(),
            self.rtt.smoothed(),
            self.rtt.deviation(),
            self.rtt.rto()
        );
        info!(
            "total send/recv: {:.2}MB / {:.2}MB, avg {:.2}KB/s / {:.2}KB/s",
            self.stats.send_bytes as f64 / (1024.0 * 1024.0),
            self.stats.recv_bytes as f64 / (1024.0 * 1024.0),
            self.stats.send_bytes as f64 / (1024.0 * secs as f64),
            self.stats.recv_bytes as f64 / (1024.0 * secs as f64)
        );
        info!(
            "recv buffered: {}, send_seq: {}, recv_seq: {}, wait_snd: {}, peer: {:?}",
            self.recv_buffer.len(),
            self.send_seq,
            self.recv_seq,
            self.send_queue.len(),
            self.peer
        );
        info!(
            "swnd: {}, cwnd: {}, ssthresh: {}",
            self.swnd,
            self.congestion.cwnd(),
            self.congestion.ssthresh()
        );
        if let Some(encoder) = &self.fec_encoder {
            info!("fec tx_seq: {}", encoder.tx_seq());
        }
        info!(
            "fec rx_seq: {}, rx_mask: {:#010x}",
            self.fec_decoder.rx_seq(),
            self.fec_decoder.rx_mask()
        );
        info!("{}", self.stats.summary());

        if secs > 1 && clear_history {
            self.stats.reset();
        }
    }

    /// 전송 통계
    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// 연결된 피어 주소
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 현재 재전송 타임아웃
    pub fn rto(&self) -> Duration {
        self.rtt.rto()
    }

    pub fn cwnd(&self) -> u32 {
        self.congestion.cwnd()
    }

    pub fn ssthresh(&self) -> u32 {
        self.congestion.ssthresh()
    }

    /// 피어가 알려준 수신 윈도우
    pub fn swnd(&self) -> u32 {
        self.swnd
    }

    /// ACK를 기다리는 프레임 수 (채우는 중인 프레임 제외)
    pub fn pending_frames(&self) -> usize {
        self.send_queue.len()
    }

    /// 애플리케이션이 아직 읽지 않은 수신 바이트
    pub fn readable_bytes(&self) -> usize {
        self.recv_buffer.len()
    }
}

fn send_datagram<S: DatagramSocket>(socket: &S, buf: &[u8], peer: SocketAddr) -> io::Result<()> {
    let n = socket.try_send_to(buf, peer)?;
    if n != buf.len() {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("데이터그램 일부만 전송: {}/{}", n, buf.len()),
        ));
    }
    Ok(())
}
