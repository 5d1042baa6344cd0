//! 전송 통계

use std::time::{Duration, Instant};

/// 세션 하나의 전송 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 전송한 DATA 블록 수 (재전송 제외)
    pub blocks_sent: u64,

    /// 수신해 기록한 DATA 블록 수 (중복 제외)
    pub blocks_received: u64,

    /// 전송한 페이로드 바이트
    pub bytes_sent: u64,

    /// 수신한 페이로드 바이트
    pub bytes_received: u64,

    /// 재전송 횟수 (타임아웃/중복 ACK)
    pub retransmits: u64,

    /// 중복 수신한 DATA 블록 수
    pub duplicate_blocks: u64,

    /// 중복 수신한 ACK 수
    pub duplicate_acks: u64,

    /// 추적 피어가 아닌 송신자에게서 온 패킷 수
    pub stray_packets: u64,

    /// 피어로 보낸 ERROR 패킷 수
    pub errors_sent: u64,

    started_at: Instant,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            blocks_sent: 0,
            blocks_received: 0,
            bytes_sent: 0,
            bytes_received: 0,
            retransmits: 0,
            duplicate_blocks: 0,
            duplicate_acks: 0,
            stray_packets: 0,
            errors_sent: 0,
            started_at: Instant::now(),
        }
    }

    /// 세션 시작 후 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// 처리율 (바이트/초, 송수신 합산)
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        (self.bytes_sent + self.bytes_received) as f64 / secs
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}
