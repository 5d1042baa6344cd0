//! 프로토콜 설정

use std::path::PathBuf;
use std::time::Duration;

use crate::{DEFAULT_MAX_TRANSMIT_ATTEMPTS, DEFAULT_RELAY_PORT, DEFAULT_SERVER_PORT};

/// BTP 프로토콜 설정
///
/// 생성 시점에 주입되는 읽기 전용 값. 세션과 릴레이는 실행 중에 설정을
/// 바꾸지 않는다.
#[derive(Debug, Clone)]
pub struct Config {
    /// 서버 well-known 포트
    pub server_port: u16,

    /// 릴레이 수신 포트
    pub relay_port: u16,

    /// 최대 재전송 횟수
    pub max_transmit_attempts: u32,

    /// 세션 엔드포인트 수신 타임아웃
    pub session_timeout: Duration,

    /// 릴레이 수신 타임아웃 (타임아웃은 단순 poll 재시도)
    pub relay_timeout: Duration,

    /// 리소스 루트 디렉터리
    pub resource_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: DEFAULT_SERVER_PORT,
            relay_port: DEFAULT_RELAY_PORT,
            max_transmit_attempts: DEFAULT_MAX_TRANSMIT_ATTEMPTS,
            session_timeout: Duration::from_secs(5),
            relay_timeout: Duration::from_secs(1),
            resource_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 불안정한 네트워크용 설정
    pub fn patient() -> Self {
        Self {
            max_transmit_attempts: 10,
            session_timeout: Duration::from_secs(10),
            relay_timeout: Duration::from_secs(2),
            ..Self::default()
        }
    }

    /// 로컬 루프백/테스트용 설정
    pub fn fast_retry() -> Self {
        Self {
            session_timeout: Duration::from_millis(200),
            relay_timeout: Duration::from_millis(100),
            ..Self::default()
        }
    }
}
