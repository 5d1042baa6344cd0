//! 수신 세션 (DATA 수신 / ACK 송신)
//!
//! - RRQ 개시(클라이언트측) 또는 WRQ 응답(서버측)
//! - 블록을 받아 리소스에 덧붙이고 ACK, 중복 블록은 ACK만 재전송
//! - 마지막(512바이트 미만) 블록 확인 후에는 drain 단계로 들어가
//!   피어의 재전송에 한도 내로 재확인하고, 조용해지면 성공으로 종결

use std::net::SocketAddr;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::message::{ErrorCode, Message, Mode, RequestKind};
use crate::session::{self, ErrorDisposition, SessionHandler, SessionState};
use crate::socket::TransferSocket;
use crate::stats::TransferStats;
use crate::{Error, Result, MAX_BLOCK_SIZE};

/// 수신 세션
///
/// 전송 요청 하나에 대해 생성되고 종결과 함께 파기된다.
pub struct ReceiveSession {
    socket: TransferSocket,
    handler: SessionHandler,
    state: SessionState,
    max_attempts: u32,

    /// 기록 대상 리소스 이름
    name: String,

    /// 마지막으로 확인(ACK)한 블록 번호
    last_acked: u16,

    /// 재전송 대상 패킷 (RRQ 또는 마지막 ACK)
    outstanding: Option<Message>,

    /// 마지막 블록 확인 후 drain 단계 여부
    draining: bool,

    /// drain 단계에서 재확인한 횟수
    drain_reacks: u32,
}

impl ReceiveSession {
    /// RRQ로 전송을 시작하는 수신 세션 (클라이언트측)
    ///
    /// 요청을 보내고 첫 DATA를 기다린다. 피어 TID는 첫 응답의 송신
    /// 포트로 확정된다.
    pub async fn initiate_read(
        socket: TransferSocket,
        server: SocketAddr,
        name: &str,
        mode: Mode,
        handler: SessionHandler,
        config: &Config,
    ) -> Result<Self> {
        let mut state = SessionState::new(server, false);
        prepare_target(None, &mut state, &handler, name).await?;

        let request = Message::Request {
            kind: RequestKind::Read,
            filename: name.to_string(),
            mode,
        };
        if let Err(e) = socket.send(&request, server).await {
            session::finish(&mut state, &handler, false);
            return Err(e);
        }
        info!("읽기 세션 시작: name={}, server={}", name, server);

        Ok(Self {
            socket,
            handler,
            state,
            max_attempts: config.max_transmit_attempts,
            name: name.to_string(),
            last_acked: 0,
            outstanding: Some(request),
            draining: false,
            drain_reacks: 0,
        })
    }

    /// WRQ에 응답하는 수신 세션 (서버측). ACK(0)을 먼저 보낸다
    pub async fn answer_write(
        socket: TransferSocket,
        peer: SocketAddr,
        name: &str,
        handler: SessionHandler,
        config: &Config,
    ) -> Result<Self> {
        let mut state = SessionState::new(peer, true);
        prepare_target(Some(&socket), &mut state, &handler, name).await?;

        let ack = Message::Ack { block: 0 };
        if let Err(e) = socket.send(&ack, peer).await {
            session::finish(&mut state, &handler, false);
            return Err(e);
        }
        info!("쓰기 응답 세션 시작: name={}, peer={}", name, peer);

        Ok(Self {
            socket,
            handler,
            state,
            max_attempts: config.max_transmit_attempts,
            name: name.to_string(),
            last_acked: 0,
            outstanding: Some(ack),
            draining: false,
            drain_reacks: 0,
        })
    }

    /// 이 세션 엔드포인트의 TID
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// 세션 실행. 종결까지 돌고 성공 시 통계를 반환한다
    pub async fn run(mut self) -> Result<TransferStats> {
        loop {
            let (bytes, from) = match self.socket.recv_raw().await {
                Ok(pair) => pair,
                Err(Error::Timeout) => {
                    if self.draining {
                        // 재전송이 더 없다 → 피어가 마지막 ACK을 받았다
                        info!(
                            "수신 완료: {} 블록, {} 바이트",
                            self.state.stats.blocks_received, self.state.stats.bytes_received
                        );
                        session::finish(&mut self.state, &self.handler, true);
                        return Ok(self.state.stats.clone());
                    }
                    if let Err(e) = self.retransmit_outstanding("타임아웃").await {
                        return self.fail_local(e).await;
                    }
                    continue;
                }
                Err(e) => return self.fail_local(e).await,
            };

            if !self.state.peer_locked {
                // 첫 응답의 송신 포트를 피어 TID로 확정
                self.state.peer = from;
                self.state.peer_locked = true;
                debug!("피어 TID 확정: {}", from);
            } else if from != self.state.peer {
                session::reject_stray(&self.socket, &mut self.state, from).await;
                continue;
            }

            let msg = match Message::decode(&bytes) {
                Ok(msg) => msg,
                Err(e) => return self.fail_raise(e).await,
            };

            match msg {
                Message::Error { code, message } => {
                    (self.handler.on_remote_error)(&self.state.status(), code, &message);
                    session::finish(&mut self.state, &self.handler, false);
                    return Err(Error::Peer { code, message });
                }

                Message::Data { block, payload } => {
                    if let Err(e) = self.handle_data(block, payload).await {
                        return self.fail_local(e).await;
                    }
                }

                other => {
                    let err = Error::UnexpectedMessage {
                        expected: "DATA",
                        got: other.kind_name(),
                    };
                    return self.fail_raise(err).await;
                }
            }
        }
    }

    /// DATA 처리. `Err`는 종결 사유
    async fn handle_data(&mut self, block: u16, payload: Bytes) -> Result<()> {
        if self.draining {
            if block == self.last_acked {
                // 피어가 마지막 ACK을 못 받았다 → 한도 내로 재확인
                self.drain_reacks += 1;
                if self.drain_reacks > self.max_attempts {
                    return Err(Error::RetryExhausted {
                        attempts: self.max_attempts,
                    });
                }
                self.state.stats.duplicate_blocks += 1;
                self.resend_outstanding("drain 재확인").await?;
            } else {
                debug!("drain 중 예상 밖 블록 무시: {}", block);
            }
            return Ok(());
        }

        let expected = session::wrap_next(self.last_acked);
        if block == expected {
            self.state.attempts = 0;
            self.write_and_ack(block, payload).await
        } else if block == self.last_acked && self.last_acked != 0 {
            // 이미 확인한 블록 재수신 → ACK만 재전송, 다시 쓰지 않는다
            self.state.stats.duplicate_blocks += 1;
            self.resend_outstanding("중복 블록").await
        } else {
            debug!("오래된 블록 무시: block={}, expected={}", block, expected);
            Ok(())
        }
    }

    /// 권한/공간 확인 후 기록하고 확인(ACK)한다
    ///
    /// 확인에 실패하면 쓰기는 무조건 수행하지 않는다. 이후의 중단 여부만
    /// 호스트 콜백이 정한다.
    async fn write_and_ack(&mut self, block: u16, payload: Bytes) -> Result<()> {
        let resource = &self.handler.resource;
        let write_result: Result<()> = if !resource.can_write(&self.name) {
            Err(Error::resource(
                ErrorCode::AccessViolation,
                format!("쓰기 불가: {}", self.name),
            ))
        } else if (payload.len() as u64) > resource.usable_space(&self.name) {
            Err(Error::resource(
                ErrorCode::DiskFull,
                format!("공간 부족: {}", self.name),
            ))
        } else {
            resource.append(&self.name, &payload)
        };

        if let Err(err) = write_result {
            match (self.handler.on_local_error)(&self.state.status(), &err) {
                ErrorDisposition::Continue => {
                    // 블록을 버리고 재전송을 기다린다 (조건이 풀릴 수 있음)
                    warn!("블록 {} 기록 보류: {}", block, err);
                    return Ok(());
                }
                ErrorDisposition::Abort => {
                    warn!("세션 중단(통보): {}", err);
                    session::raise_error(&self.socket, &mut self.state, &err).await;
                    session::finish(&mut self.state, &self.handler, false);
                    return Err(err);
                }
                ErrorDisposition::AbortQuiet => {
                    warn!("세션 중단: {}", err);
                    session::finish(&mut self.state, &self.handler, false);
                    return Err(err);
                }
            }
        }

        self.state.stats.blocks_received += 1;
        self.state.stats.bytes_received += payload.len() as u64;
        self.state.block = block;

        let ack = Message::Ack { block };
        self.socket.send(&ack, self.state.peer).await?;
        self.last_acked = block;
        self.outstanding = Some(ack);

        if payload.len() < MAX_BLOCK_SIZE {
            debug!("마지막 블록 {} 확인, drain 진입", block);
            self.draining = true;
        }
        Ok(())
    }

    /// 미확인 응답 패킷 재전송 (타임아웃 경로, 한도 적용)
    async fn retransmit_outstanding(&mut self, why: &str) -> Result<()> {
        self.state.attempts += 1;
        if self.state.attempts > self.max_attempts {
            return Err(Error::RetryExhausted {
                attempts: self.state.attempts - 1,
            });
        }
        self.resend_outstanding(why).await
    }

    /// 응답 패킷 재전송 (횟수 무관)
    async fn resend_outstanding(&mut self, why: &str) -> Result<()> {
        if let Some(msg) = &self.outstanding {
            debug!("{} → {} 재전송", why, msg.kind_name());
            self.socket.send(msg, self.state.peer).await?;
            self.state.stats.retransmits += 1;
        }
        Ok(())
    }

    /// 프로토콜 위반: 피어에 ERROR 통보 후 실패 종결
    async fn fail_raise(&mut self, err: Error) -> Result<TransferStats> {
        warn!("세션 실패(통보): {}", err);
        session::raise_error(&self.socket, &mut self.state, &err).await;
        session::finish(&mut self.state, &self.handler, false);
        Err(err)
    }

    /// 하위 계층 실패: 호스트에 알리고 실패 종결
    async fn fail_local(&mut self, err: Error) -> Result<TransferStats> {
        if !self.state.complete {
            warn!("세션 실패: {}", err);
            let _ = (self.handler.on_local_error)(&self.state.status(), &err);
            session::finish(&mut self.state, &self.handler, false);
        }
        Err(err)
    }
}

/// 기록 대상 준비
///
/// 존재하면 FileExists, 없으면 FileNotFound를 호스트에 알리고 판단을
/// 따른다. Continue면 없는 대상을 만들어 계속한다. 서버측(`socket`이
/// 주어진 경우)은 Abort 시 피어에 ERROR를 통보한다.
async fn prepare_target(
    socket: Option<&TransferSocket>,
    state: &mut SessionState,
    handler: &SessionHandler,
    name: &str,
) -> Result<()> {
    let err = if handler.resource.exists(name) {
        Error::resource(ErrorCode::FileExists, format!("대상이 이미 존재: {name}"))
    } else {
        Error::resource(ErrorCode::FileNotFound, format!("대상 없음: {name}"))
    };

    match (handler.on_local_error)(&state.status(), &err) {
        ErrorDisposition::Continue => {
            if let Err(e) = handler.resource.create_if_missing(name) {
                session::finish(state, handler, false);
                return Err(e);
            }
            Ok(())
        }
        ErrorDisposition::Abort => {
            if let Some(socket) = socket {
                session::raise_error(socket, state, &err).await;
            }
            session::finish(state, handler, false);
            Err(err)
        }
        ErrorDisposition::AbortQuiet => {
            session::finish(state, handler, false);
            Err(err)
        }
    }
}
