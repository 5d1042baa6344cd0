//! 세션 공통 기반
//!
//! 송신/수신 세션이 공유하는 상태와 호스트 capability 집합.
//! 세션 하나는 단일 태스크에서 순차 실행되며 내부 잠금이 없다.
//! 세션은 전송 요청마다 생성되고 완료 플래그가 서면 파기된다 (재개 없음).

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::message::{ErrorCode, Message};
use crate::resource::ResourceAccessor;
use crate::socket::TransferSocket;
use crate::stats::TransferStats;
use crate::Error;

/// 로컬 에러에 대한 호스트 판단
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// 에러를 흡수하고 세션 계속
    Continue,
    /// 피어에 ERROR 통보 후 세션 종료
    Abort,
    /// ERROR 통보 없이 조용히 종료
    AbortQuiet,
}

/// 콜백에 전달되는 세션 진행 스냅샷
#[derive(Debug, Clone)]
pub struct SessionStatus {
    /// 현재 피어 주소 (TID 확정 전에는 요청을 보낸 well-known 주소)
    pub peer: SocketAddr,

    /// 마지막으로 다룬 블록 번호
    pub block: u16,

    /// 종결 여부
    pub complete: bool,

    /// 성공 여부 (종결 후에만 의미)
    pub success: bool,
}

/// 로컬 에러 콜백: 계속할지 중단할지 호스트가 판단한다
pub type LocalErrorFn = Box<dyn Fn(&SessionStatus, &Error) -> ErrorDisposition + Send + Sync>;

/// 피어 에러 콜백: 통보용. 세션은 직후 무조건 종결된다
pub type RemoteErrorFn = Box<dyn Fn(&SessionStatus, ErrorCode, &str) + Send + Sync>;

/// 종결 콜백: 성공/실패와 무관하게 정확히 한 번 호출된다
pub type CompletedFn = Box<dyn Fn(&SessionStatus) + Send + Sync>;

/// 호스트가 세션 생성 시 주입하는 capability 집합
///
/// 리소스 접근자 하나와 콜백 셋으로 구성된다. 클래스 계층이 아니라
/// 함수 값의 묶음이므로 호스트는 필요한 정책만 바꿔 끼운다.
pub struct SessionHandler {
    pub resource: Arc<dyn ResourceAccessor>,
    pub on_local_error: LocalErrorFn,
    pub on_remote_error: RemoteErrorFn,
    pub on_completed: CompletedFn,
}

impl SessionHandler {
    /// 기본 핸들러
    ///
    /// 로컬 에러 정책: 대상이 없으면 만들어서 계속(FileNotFound → Continue),
    /// 이미 있으면 통보 없이 중단(FileExists → AbortQuiet), 그 외 Abort.
    /// 피어 에러는 로그만 남긴다.
    pub fn new(resource: Arc<dyn ResourceAccessor>) -> Self {
        Self {
            resource,
            on_local_error: Box::new(|_, err| match err {
                Error::Resource {
                    code: ErrorCode::FileNotFound,
                    ..
                } => ErrorDisposition::Continue,
                Error::Resource {
                    code: ErrorCode::FileExists,
                    ..
                } => ErrorDisposition::AbortQuiet,
                _ => ErrorDisposition::Abort,
            }),
            on_remote_error: Box::new(|status, code, text| {
                warn!(
                    "피어 에러 수신: peer={}, code={:?}, text={}",
                    status.peer, code, text
                );
            }),
            on_completed: Box::new(|_| {}),
        }
    }

    /// 로컬 에러 정책 교체
    pub fn with_local_error(
        mut self,
        f: impl Fn(&SessionStatus, &Error) -> ErrorDisposition + Send + Sync + 'static,
    ) -> Self {
        self.on_local_error = Box::new(f);
        self
    }

    /// 피어 에러 콜백 교체
    pub fn with_remote_error(
        mut self,
        f: impl Fn(&SessionStatus, ErrorCode, &str) + Send + Sync + 'static,
    ) -> Self {
        self.on_remote_error = Box::new(f);
        self
    }

    /// 종결 콜백 교체
    pub fn with_completed(
        mut self,
        f: impl Fn(&SessionStatus) + Send + Sync + 'static,
    ) -> Self {
        self.on_completed = Box::new(f);
        self
    }
}

/// 세션 공통 상태
pub(crate) struct SessionState {
    pub peer: SocketAddr,

    /// 첫 유효 응답으로 피어 TID가 확정되었는지
    pub peer_locked: bool,

    /// 마지막으로 다룬 블록 번호
    pub block: u16,

    pub complete: bool,
    pub success: bool,

    /// 현재 패킷의 연속 재전송 횟수. 진행이 있으면 0으로 돌아간다
    pub attempts: u32,

    pub stats: TransferStats,
}

impl SessionState {
    pub fn new(peer: SocketAddr, peer_locked: bool) -> Self {
        Self {
            peer,
            peer_locked,
            block: 0,
            complete: false,
            success: false,
            attempts: 0,
            stats: TransferStats::new(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            peer: self.peer,
            block: self.block,
            complete: self.complete,
            success: self.success,
        }
    }
}

/// 다음 블록 번호. 65535 다음은 1로 순환한다 (0은 WRQ 확인에 예약)
pub(crate) fn wrap_next(block: u16) -> u16 {
    if block == u16::MAX {
        1
    } else {
        block + 1
    }
}

/// 추적 피어가 아닌 송신자 처리: UnknownTid를 회신하고 세션은 계속한다
pub(crate) async fn reject_stray(
    socket: &TransferSocket,
    state: &mut SessionState,
    from: SocketAddr,
) {
    debug!("낯선 TID에서 온 패킷: {}", from);
    state.stats.stray_packets += 1;
    let msg = Message::Error {
        code: ErrorCode::UnknownTid,
        message: ErrorCode::UnknownTid.default_text().into(),
    };
    if let Err(e) = socket.send(&msg, from).await {
        warn!("UnknownTid 회신 실패: {}", e);
    }
}

/// 피어에 ERROR를 best-effort로 통보한다. 전송 실패는 로그만 남기고 삼킨다
pub(crate) async fn raise_error(socket: &TransferSocket, state: &mut SessionState, err: &Error) {
    let code = err.error_code();
    let msg = Message::Error {
        code,
        message: code.default_text().into(),
    };
    match socket.send(&msg, state.peer).await {
        Ok(()) => state.stats.errors_sent += 1,
        Err(e) => warn!("ERROR 패킷 전송 실패: {}", e),
    }
}

/// 세션 종결. 종결 콜백은 정확히 한 번만 호출된다
pub(crate) fn finish(state: &mut SessionState, handler: &SessionHandler, success: bool) {
    if state.complete {
        return;
    }
    state.complete = true;
    state.success = success;
    (handler.on_completed)(&state.status());
}
