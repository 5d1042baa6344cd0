//! 에러 타입 정의

use thiserror::Error;

use crate::message::ErrorCode;

/// BTP 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("잘못된 패킷: {reason}")]
    Malformed { reason: String },

    #[error("예상치 못한 메시지: expected {expected}, got {got}")]
    UnexpectedMessage {
        expected: &'static str,
        got: &'static str,
    },

    #[error("피어 에러 수신: code={code:?}, message={message}")]
    Peer { code: ErrorCode, message: String },

    #[error("리소스 에러 ({code:?}): {reason}")]
    Resource { code: ErrorCode, reason: String },

    #[error("수신 타임아웃")]
    Timeout,

    #[error("재전송 한도 초과: {attempts}회")]
    RetryExhausted { attempts: u32 },

    #[error("엔드포인트 종료")]
    Closed,
}

impl Error {
    /// 코덱 경계에서 쓰는 진단 문자열 포함 생성자
    pub fn malformed(reason: impl Into<String>) -> Self {
        Error::Malformed {
            reason: reason.into(),
        }
    }

    /// 리소스 실패 생성자
    pub fn resource(code: ErrorCode, reason: impl Into<String>) -> Self {
        Error::Resource {
            code,
            reason: reason.into(),
        }
    }

    /// 피어에게 통보할 때 사용할 와이어 에러 코드
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Error::Resource { code, .. } => *code,
            Error::Peer { code, .. } => *code,
            Error::Malformed { .. } | Error::UnexpectedMessage { .. } => {
                ErrorCode::IllegalOperation
            }
            _ => ErrorCode::Undefined,
        }
    }

    /// 수신 타임아웃 여부
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
