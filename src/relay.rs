//! 장애 주입 릴레이
//!
//! 클라이언트와 서버 사이에 앉아 패킷을 중계하면서, 규칙에 걸린 패킷을
//! 의도적으로 버리거나 지연/중복/변조시켜 프로토콜의 오류 경로를 검증한다.
//!
//! 추적하는 엔드포인트는 셋: 현재 클라이언트, 서버 well-known 주소,
//! 서버의 첫 응답에서 학습한 워커 TID. 새 클라이언트가 나타나면 추적
//! 상태를 덮어쓴다 — 한 번에 전송 하나만 중계해 장애 주입을 결정적으로
//! 유지한다.

use std::net::SocketAddr;
use std::time::Duration;

use rand::RngCore;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::fault::FaultRule;
use crate::message::{Message, RequestKind};
use crate::socket::TransferSocket;
use crate::{Error, Result, MAX_BLOCK_SIZE};

/// 정의되지 않은 opcode(0)의 합성 패킷
const INVALID_OPCODE_PACKET: [u8; 4] = [0, 0, 0, 0];

/// 일회용 엔드포인트가 응답을 버리기 전에 기다리는 시간
const ONESHOT_REPLY_TIMEOUT: Duration = Duration::from_millis(200);

/// 규칙 매칭 시 적용하는 장애 동작
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAction {
    /// 패킷을 버린다. 절대 전달되지 않는다
    Lose,

    /// 지정 시간만큼 기다렸다가 정상 전달
    Delay(Duration),

    /// 정상 전달 후 한 번 더 전달. 요청 패킷이면 새 전송 경로로 재전송
    Duplicate,

    /// 정의되지 않은 opcode의 4바이트 패킷을 먼저 보내고 원본을 정상 전달
    InvalidOpcode,

    /// 피어에 등록된 적 없는 일회용 엔드포인트에서 패킷을 보내고 응답은
    /// 버린 뒤, 원본은 정상 경로로 전달
    InvalidTid,

    /// 마지막 바이트 앞에 필러를 끼워 페이로드를 512바이트 초과로 늘려 전달
    ExtendPacket,
}

impl FaultAction {
    /// CLI 인자용 이름 파싱
    pub fn from_name(name: &str, delay: Duration) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "lose" => Some(FaultAction::Lose),
            "delay" => Some(FaultAction::Delay(delay)),
            "duplicate" => Some(FaultAction::Duplicate),
            "invalid-opcode" => Some(FaultAction::InvalidOpcode),
            "invalid-tid" => Some(FaultAction::InvalidTid),
            "extend" => Some(FaultAction::ExtendPacket),
            _ => None,
        }
    }
}

/// 장애 계획: 어떤 패킷에(rule) 무엇을(action)
#[derive(Debug, Clone)]
pub struct FaultPlan {
    pub rule: FaultRule,
    pub action: FaultAction,
}

/// 장애 주입 릴레이
pub struct Relay {
    socket: TransferSocket,

    /// 서버 well-known 주소
    server_addr: SocketAddr,

    /// 추적 중인 클라이언트
    client: Option<SocketAddr>,

    /// 학습한 서버 워커 TID
    worker: Option<SocketAddr>,

    /// 장애 계획. 없으면 투명 릴레이
    plan: Option<FaultPlan>,
}

impl Relay {
    /// 릴레이 바인딩. 수신 타임아웃은 poll 주기로 쓰인다
    pub async fn bind(
        listen: SocketAddr,
        server_addr: SocketAddr,
        plan: Option<FaultPlan>,
        config: &Config,
    ) -> Result<Self> {
        let socket = TransferSocket::bind(listen, config.relay_timeout).await?;
        info!(
            "릴레이 시작: listen={}, server={}, fault={:?}",
            socket.local_addr()?,
            server_addr,
            plan.as_ref().map(|p| p.action)
        );
        Ok(Self {
            socket,
            server_addr,
            client: None,
            worker: None,
            plan,
        })
    }

    /// 바인딩된 수신 주소
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// 릴레이 루프. 태스크 취소나 소켓 에러까지 돈다
    pub async fn run(mut self) -> Result<()> {
        loop {
            let (bytes, from) = match self.socket.recv_raw().await {
                Ok(pair) => pair,
                // 타임아웃은 단순 poll 재시도
                Err(Error::Timeout) => continue,
                Err(e) => {
                    warn!("릴레이 종료: {}", e);
                    return Err(e);
                }
            };
            self.dispatch(&bytes, from).await?;
        }
    }

    /// 수신 패킷 분류 및 중계
    async fn dispatch(&mut self, bytes: &[u8], from: SocketAddr) -> Result<()> {
        if self.client == Some(from) {
            match self.worker {
                Some(worker) => self.forward(bytes, worker).await,
                // 워커 학습 전 클라이언트 재전송 → 수립 경로 재시도
                None => self.establish(bytes).await,
            }
        } else if self.worker == Some(from) {
            match self.client {
                Some(client) => self.forward(bytes, client).await,
                None => Ok(()),
            }
        } else {
            // 새 전송: 추적 상태를 덮어쓴다
            info!("새 전송 감지: client={}", from);
            self.client = Some(from);
            self.worker = None;
            self.establish(bytes).await
        }
    }

    /// 새 전송 수립
    ///
    /// 요청을 서버 well-known 주소로 전달하고, 서버의 첫 응답을 기다려
    /// 그 송신 포트를 워커 TID로 학습한 뒤 클라이언트로 회신한다.
    async fn establish(&mut self, bytes: &[u8]) -> Result<()> {
        self.forward(bytes, self.server_addr).await?;

        match self.socket.recv_raw().await {
            Ok((reply, src)) => {
                if self.client == Some(src) {
                    debug!("응답 대기 중 클라이언트 패킷 무시: {}", src);
                    return Ok(());
                }
                info!("서버 워커 TID 학습: {}", src);
                self.worker = Some(src);
                if let Some(client) = self.client {
                    self.forward(&reply, client).await?;
                }
                Ok(())
            }
            Err(Error::Timeout) => {
                warn!("서버 첫 응답 타임아웃 (클라이언트 재시도 대기)");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// 전달 훅. 모든 중계가 이 지점을 지나며 규칙에 걸리면 장애를 적용한다
    async fn forward(&mut self, bytes: &[u8], dest: SocketAddr) -> Result<()> {
        // 파싱 불가 패킷은 규칙 매칭 없이 그대로 전달
        let mut matched = None;
        if let Some(plan) = self.plan.as_mut() {
            if let Ok(msg) = Message::decode(bytes) {
                if plan.rule.matches(&msg) {
                    matched = Some((plan.action, msg));
                }
            }
        }

        let Some((action, msg)) = matched else {
            return self.socket.send_raw(bytes, dest).await;
        };

        match action {
            FaultAction::Lose => {
                info!("장애 주입(Lose): {} 폐기", msg.kind_name());
                Ok(())
            }

            FaultAction::Delay(duration) => {
                info!("장애 주입(Delay): {} {:?} 지연", msg.kind_name(), duration);
                tokio::time::sleep(duration).await;
                self.socket.send_raw(bytes, dest).await
            }

            FaultAction::Duplicate => {
                info!("장애 주입(Duplicate): {}", msg.kind_name());
                self.socket.send_raw(bytes, dest).await?;
                if matches!(
                    msg,
                    Message::Request {
                        kind: RequestKind::Read | RequestKind::Write,
                        ..
                    }
                ) {
                    // 요청은 새 전송 경로로 재전송해 연결을 다시 수립한다
                    self.reestablish(bytes).await
                } else {
                    self.socket.send_raw(bytes, dest).await
                }
            }

            FaultAction::InvalidOpcode => {
                info!("장애 주입(InvalidOpcode): {} 앞에 합성 패킷", msg.kind_name());
                self.socket.send_raw(&INVALID_OPCODE_PACKET, dest).await?;
                self.socket.send_raw(bytes, dest).await
            }

            FaultAction::InvalidTid => {
                info!("장애 주입(InvalidTid): {}", msg.kind_name());
                self.send_from_oneshot(bytes, dest).await?;
                self.socket.send_raw(bytes, dest).await
            }

            FaultAction::ExtendPacket => {
                let padded = extend_packet(bytes);
                info!(
                    "장애 주입(ExtendPacket): {} {} → {} 바이트",
                    msg.kind_name(),
                    bytes.len(),
                    padded.len()
                );
                self.socket.send_raw(&padded, dest).await
            }
        }
    }

    /// 중복 요청 재전송: 서버 첫 응답을 다시 기다려 워커 TID를 재학습한다
    async fn reestablish(&mut self, bytes: &[u8]) -> Result<()> {
        self.socket.send_raw(bytes, self.server_addr).await?;
        match self.socket.recv_raw().await {
            Ok((reply, src)) => {
                if self.client == Some(src) {
                    return Ok(());
                }
                info!("서버 워커 TID 재학습: {}", src);
                self.worker = Some(src);
                if let Some(client) = self.client {
                    self.socket.send_raw(&reply, client).await?;
                }
                Ok(())
            }
            Err(Error::Timeout) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// 피어에 등록된 적 없는 일회용 엔드포인트에서 전송하고 응답은 버린다
    async fn send_from_oneshot(&self, bytes: &[u8], dest: SocketAddr) -> Result<()> {
        let oneshot = UdpSocket::bind("0.0.0.0:0").await?;
        oneshot.send_to(bytes, dest).await?;

        let mut buf = [0u8; 2048];
        match tokio::time::timeout(ONESHOT_REPLY_TIMEOUT, oneshot.recv_from(&mut buf)).await {
            Ok(Ok((len, src))) => debug!("일회용 TID 응답 폐기: {} 바이트 from {}", len, src),
            _ => debug!("일회용 TID 응답 없음"),
        }
        Ok(())
    }
}

/// 마지막 바이트 앞에 무작위 필러를 끼워 페이로드를 512바이트 초과로 늘린다
///
/// 종결 바이트(요청/에러의 `\0`)는 끝자리에 그대로 남는다.
fn extend_packet(bytes: &[u8]) -> Vec<u8> {
    // 헤더 4 + 페이로드 513이면 어떤 패킷이든 상한을 넘긴다
    let target = 4 + MAX_BLOCK_SIZE + 1;
    let pad = target.saturating_sub(bytes.len()).max(1);

    let mut filler = vec![0u8; pad];
    rand::thread_rng().fill_bytes(&mut filler);

    let mut out = Vec::with_capacity(bytes.len() + pad);
    match bytes.split_last() {
        Some((&last, head)) => {
            out.extend_from_slice(head);
            out.extend_from_slice(&filler);
            out.push(last);
        }
        None => out.extend_from_slice(&filler),
    }
    out
}
