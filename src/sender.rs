//! 송신 세션 (DATA 송신 / ACK 수신)
//!
//! - RRQ 응답(서버측) 또는 WRQ 개시(클라이언트측)
//! - stop-and-wait: 블록 하나 보내고 해당 ACK을 기다린다
//! - 타임아웃/중복 ACK 시 현재 패킷 재전송, 한도 초과 시 실패 종결

use std::net::SocketAddr;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::message::{ErrorCode, Message, Mode, RequestKind};
use crate::session::{self, ErrorDisposition, SessionHandler, SessionState};
use crate::socket::TransferSocket;
use crate::stats::TransferStats;
use crate::{Error, Result, MAX_BLOCK_SIZE};

/// 송신 세션
///
/// 전송 요청 하나에 대해 생성되고 종결과 함께 파기된다.
pub struct TransmitSession {
    socket: TransferSocket,
    handler: SessionHandler,
    state: SessionState,
    max_attempts: u32,

    /// 전송할 블록 (512바이트 이하 조각)
    blocks: Vec<Bytes>,

    /// 현재 미확인 블록의 인덱스
    cursor: usize,

    /// 기다리는 ACK 번호. 0이면 WRQ 확인 대기
    expected: u16,

    /// 직전에 확인된 블록 번호
    prev_ack: u16,

    /// 재전송 대상 패킷 (WRQ 또는 현재 DATA)
    outstanding: Option<Message>,
}

impl TransmitSession {
    /// RRQ에 응답하는 송신 세션 (서버측)
    ///
    /// 리소스를 읽어 블록으로 나누고 첫 DATA를 즉시 보낸다. 리소스 에러는
    /// 호스트 콜백에 알린 뒤 (AbortQuiet가 아니면) 피어에 ERROR로 통보된다.
    pub async fn answer_read(
        socket: TransferSocket,
        peer: SocketAddr,
        name: &str,
        handler: SessionHandler,
        config: &Config,
    ) -> Result<Self> {
        let mut state = SessionState::new(peer, true);

        let payload = match load_payload(&handler, name) {
            Ok(payload) => payload,
            Err(err) => {
                // 읽기 측은 리소스 없이 계속할 수 없다 → 통보 여부만 호스트가 정한다
                let disposition = (handler.on_local_error)(&state.status(), &err);
                if disposition != ErrorDisposition::AbortQuiet {
                    session::raise_error(&socket, &mut state, &err).await;
                }
                session::finish(&mut state, &handler, false);
                return Err(err);
            }
        };

        info!(
            "읽기 응답 세션 시작: name={}, peer={}, {} 바이트",
            name,
            peer,
            payload.len()
        );

        let mut session = Self {
            socket,
            handler,
            state,
            max_attempts: config.max_transmit_attempts,
            blocks: split_blocks(&payload),
            cursor: 0,
            expected: 1,
            prev_ack: 0,
            outstanding: None,
        };
        if let Err(e) = session.send_block().await {
            session::finish(&mut session.state, &session.handler, false);
            return Err(e);
        }
        Ok(session)
    }

    /// WRQ로 전송을 시작하는 송신 세션 (클라이언트측)
    ///
    /// 요청을 보내고 ACK(0)을 기다린다. 피어 TID는 첫 응답의 송신 포트로
    /// 확정된다.
    pub async fn initiate_write(
        socket: TransferSocket,
        server: SocketAddr,
        name: &str,
        mode: Mode,
        handler: SessionHandler,
        config: &Config,
    ) -> Result<Self> {
        let mut state = SessionState::new(server, false);

        let payload = match load_payload(&handler, name) {
            Ok(payload) => payload,
            Err(err) => {
                let _ = (handler.on_local_error)(&state.status(), &err);
                session::finish(&mut state, &handler, false);
                return Err(err);
            }
        };

        let blocks = split_blocks(&payload);
        info!(
            "쓰기 세션 시작: name={}, server={}, {} 블록",
            name,
            server,
            blocks.len()
        );

        let request = Message::Request {
            kind: RequestKind::Write,
            filename: name.to_string(),
            mode,
        };
        if let Err(e) = socket.send(&request, server).await {
            session::finish(&mut state, &handler, false);
            return Err(e);
        }

        Ok(Self {
            socket,
            handler,
            state,
            max_attempts: config.max_transmit_attempts,
            blocks,
            cursor: 0,
            expected: 0,
            prev_ack: 0,
            outstanding: Some(request),
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

                Message::Ack { block } => match self.handle_ack(block).await {
                    Ok(true) => {
                        info!(
                            "전송 완료: {} 블록, {} 바이트",
                            self.state.stats.blocks_sent, self.state.stats.bytes_sent
                        );
                        session::finish(&mut self.state, &self.handler, true);
                        return Ok(self.state.stats.clone());
                    }
                    Ok(false) => {}
                    Err(e) => return self.fail_local(e).await,
                },

                other => {
                    let err = Error::UnexpectedMessage {
                        expected: "ACK",
                        got: other.kind_name(),
                    };
                    return self.fail_raise(err).await;
                }
            }
        }
    }

    /// ACK 처리. `Ok(true)`는 성공 종결
    async fn handle_ack(&mut self, block: u16) -> Result<bool> {
        if block == self.expected {
            self.state.attempts = 0;
            if self.expected == 0 {
                // WRQ 확인 → 첫 DATA
                self.send_block().await?;
                return Ok(false);
            }
            self.prev_ack = self.expected;
            self.cursor += 1;
            if self.cursor == self.blocks.len() {
                return Ok(true);
            }
            self.send_block().await?;
            Ok(false)
        } else if block == self.prev_ack && self.expected != 0 {
            // 이미 확인된 블록의 중복 ACK → 현재 DATA 그대로 재전송, 전진 없음
            self.state.stats.duplicate_acks += 1;
            self.retransmit_outstanding("중복 ACK").await?;
            Ok(false)
        } else {
            debug!("오래된 ACK 무시: block={}, expected={}", block, self.expected);
            Ok(false)
        }
    }

    /// cursor 위치의 블록 전송
    async fn send_block(&mut self) -> Result<()> {
        let block = block_for(self.cursor);
        let payload = self.blocks[self.cursor].clone();
        self.state.stats.blocks_sent += 1;
        self.state.stats.bytes_sent += payload.len() as u64;

        let msg = Message::Data { block, payload };
        self.socket.send(&msg, self.state.peer).await?;
        self.expected = block;
        self.state.block = block;
        self.outstanding = Some(msg);
        Ok(())
    }

    /// 미확인 패킷 재전송. 한도 초과 시 에러
    async fn retransmit_outstanding(&mut self, why: &str) -> Result<()> {
        self.state.attempts += 1;
        if self.state.attempts > self.max_attempts {
            return Err(Error::RetryExhausted {
                attempts: self.state.attempts - 1,
            });
        }
        if let Some(msg) = &self.outstanding {
            debug!(
                "{} → {} 재전송 ({}/{})",
                why,
                msg.kind_name(),
                self.state.attempts,
                self.max_attempts
            );
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

/// 인덱스 `i` 블록의 와이어 번호: 1..=65535 순환, 0은 건너뛴다
fn block_for(i: usize) -> u16 {
    (1 + (i % 65535)) as u16
}

/// 페이로드를 512바이트 이하 블록으로 분할
///
/// 길이가 512의 배수이면 (빈 페이로드 포함) 빈 종료 블록을 덧붙여
/// 전송이 항상 짧은 블록으로 끝나게 한다.
fn split_blocks(payload: &Bytes) -> Vec<Bytes> {
    let mut blocks = Vec::with_capacity(payload.len() / MAX_BLOCK_SIZE + 1);
    let mut offset = 0;
    while offset < payload.len() {
        let end = (offset + MAX_BLOCK_SIZE).min(payload.len());
        blocks.push(payload.slice(offset..end));
        offset = end;
    }
    if payload.len() % MAX_BLOCK_SIZE == 0 {
        blocks.push(Bytes::new());
    }
    blocks
}

/// 읽기 측 리소스 확인 후 전체 내용 적재
fn load_payload(handler: &SessionHandler, name: &str) -> Result<Bytes> {
    let resource = &handler.resource;
    if !resource.exists(name) {
        return Err(Error::resource(
            ErrorCode::FileNotFound,
            format!("대상 없음: {name}"),
        ));
    }
    if !resource.can_read(name) {
        return Err(Error::resource(
            ErrorCode::AccessViolation,
            format!("읽기 불가: {name}"),
        ));
    }
    Ok(Bytes::from(resource.read_all(name)?))
}
