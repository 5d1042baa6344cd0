//! 장애 규칙 (ErrorChecker)
//!
//! 파싱된 메시지를 보고 장애를 적용할지 판정하는 predicate.
//! 릴레이의 전달 훅이 패킷마다 한 번씩 물어본다.

use crate::message::{Message, Opcode};

/// 장애 대상 판정 규칙
///
/// - 메시지 종류는 정확히 일치해야 한다
/// - 블록 번호가 설정되면 해당 블록에만 적용된다
/// - 반복 간격이 설정되면 매칭할 때마다 대상 블록이 간격만큼 전진한다
///   ("N블록마다 한 번" 류의 시나리오)
#[derive(Debug, Clone)]
pub struct FaultRule {
    kind: Opcode,
    block: Option<u16>,
    every: Option<u16>,
}

impl FaultRule {
    /// 해당 종류의 모든 패킷에 걸리는 규칙
    pub fn new(kind: Opcode) -> Self {
        Self {
            kind,
            block: None,
            every: None,
        }
    }

    /// 특정 블록 번호에만 적용
    pub fn on_block(mut self, block: u16) -> Self {
        self.block = Some(block);
        self
    }

    /// 매칭 후 대상 블록을 `interval`만큼 전진
    pub fn repeat_every(mut self, interval: u16) -> Self {
        self.every = Some(interval);
        self
    }

    /// 이 패킷에 장애를 적용할지 판정
    ///
    /// 매칭되면 반복 규칙에 따라 내부 대상 블록이 전진한다.
    pub fn matches(&mut self, msg: &Message) -> bool {
        if msg.opcode() != self.kind {
            return false;
        }
        // 블록이 없는 메시지(요청/에러)는 종류 일치만 본다
        if let (Some(target), Some(block)) = (self.block, msg.block()) {
            if block != target {
                return false;
            }
        }

        if let (Some(every), Some(target)) = (self.every, self.block) {
            self.block = Some(target.wrapping_add(every));
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn data(block: u16) -> Message {
        Message::Data {
            block,
            payload: Bytes::from_static(b"x"),
        }
    }

    #[test]
    fn test_kind_must_match_exactly() {
        let mut rule = FaultRule::new(Opcode::Data);
        assert!(rule.matches(&data(1)));
        assert!(!rule.matches(&Message::Ack { block: 1 }));
    }

    #[test]
    fn test_block_filter() {
        let mut rule = FaultRule::new(Opcode::Data).on_block(2);
        assert!(!rule.matches(&data(1)));
        assert!(rule.matches(&data(2)));
        // 간격이 없으면 대상은 고정
        assert!(rule.matches(&data(2)));
    }

    #[test]
    fn test_repeat_interval_advances_target() {
        // 블록 1에서 시작해 매칭마다 3씩 전진: 1, 4, 7, ...
        let mut rule = FaultRule::new(Opcode::Ack).repeat_every(3).on_block(1);
        assert!(rule.matches(&Message::Ack { block: 1 }));
        assert!(!rule.matches(&Message::Ack { block: 2 }));
        assert!(!rule.matches(&Message::Ack { block: 3 }));
        assert!(rule.matches(&Message::Ack { block: 4 }));
        assert!(rule.matches(&Message::Ack { block: 7 }));
    }

    #[test]
    fn test_blockless_message_matches_on_kind() {
        let mut rule = FaultRule::new(Opcode::Rrq).on_block(9);
        let req = Message::Request {
            kind: crate::message::RequestKind::Read,
            filename: "f".into(),
            mode: crate::message::Mode::Octet,
        };
        assert!(rule.matches(&req));
    }
}
