//! 릴레이 장애 주입 시나리오 테스트
//!
//! 실제 UDP 소켓으로 릴레이를 사이에 두고, 장애 규칙이 정확히 지정한
//! 패킷에만 결정적으로 적용되는지 검증한다.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::task::JoinHandle;

use btp::{
    DirAccessor, Error, FaultAction, FaultPlan, FaultRule, Message, Mode, Opcode, ReceiveSession,
    Relay, RequestKind, Result, SessionHandler,
};
use common::{bind_raw, start_server, test_config};

async fn start_relay(
    server_addr: SocketAddr,
    plan: Option<FaultPlan>,
) -> (SocketAddr, JoinHandle<Result<()>>) {
    let relay = Relay::bind(
        "127.0.0.1:0".parse().unwrap(),
        server_addr,
        plan,
        &test_config(),
    )
    .await
    .unwrap();
    let addr = relay.local_addr().unwrap();
    (addr, tokio::spawn(relay.run()))
}

fn rrq(name: &str) -> Vec<u8> {
    Message::Request {
        kind: RequestKind::Read,
        filename: name.into(),
        mode: Mode::Octet,
    }
    .encode()
}

fn data(block: u16, payload: &'static [u8]) -> Vec<u8> {
    Message::Data {
        block,
        payload: Bytes::from_static(payload),
    }
    .encode()
}

fn ack(block: u16) -> Vec<u8> {
    Message::Ack { block }.encode()
}

/// RRQ("a.txt") → 릴레이 → 서버, 서버 워커의 "Hello World" 응답이
/// 릴레이를 거쳐 클라이언트에 기록되는 전체 시나리오
#[tokio::test]
async fn test_hello_world_through_transparent_relay() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    std::fs::write(server_dir.path().join("a.txt"), b"Hello World").unwrap();

    let config = test_config();
    let (server_addr, server) = start_server(server_dir.path().to_path_buf(), config.clone()).await;
    let (relay_addr, relay) = start_relay(server_addr, None).await;

    let socket = bind_raw(300).await;
    let handler = SessionHandler::new(Arc::new(DirAccessor::new(client_dir.path())));
    let session =
        ReceiveSession::initiate_read(socket, relay_addr, "a.txt", Mode::Octet, handler, &config)
            .await
            .unwrap();
    let stats = session.run().await.unwrap();

    assert_eq!(stats.blocks_received, 1);
    assert_eq!(stats.bytes_received, 11);
    assert_eq!(
        std::fs::read(client_dir.path().join("a.txt")).unwrap(),
        b"Hello World"
    );

    relay.abort();
    server.abort();
}

/// Lose(DATA, block=1): 블록 1은 한 번도 전달되지 않고,
/// 같은 릴레이를 지나는 블록 2는 그대로 전달된다
#[tokio::test]
async fn test_lose_data_block_one_is_deterministic() {
    let mut server = bind_raw(1000).await;
    let server_addr = server.local_addr().unwrap();
    let mut client = bind_raw(300).await;

    let plan = FaultPlan {
        rule: FaultRule::new(Opcode::Data).on_block(1),
        action: FaultAction::Lose,
    };
    let (relay_addr, relay) = start_relay(server_addr, Some(plan)).await;

    client.send_raw(&rrq("a.txt"), relay_addr).await.unwrap();
    let (forwarded, from) = server.recv_raw().await.unwrap();
    assert_eq!(forwarded, rrq("a.txt"));
    assert_eq!(from, relay_addr);

    // 블록 1은 폐기된다
    server.send_raw(&data(1, b"first"), relay_addr).await.unwrap();
    assert!(matches!(client.recv_raw().await, Err(Error::Timeout)));

    // 블록 2는 그대로 통과한다
    server
        .send_raw(&data(2, b"second"), relay_addr)
        .await
        .unwrap();
    let (passed, _) = client.recv_raw().await.unwrap();
    assert_eq!(passed, data(2, b"second"));

    relay.abort();
}

/// Delay(ACK, block=1): 지연 시간 전에는 전달이 없고, 지나면 정확히
/// 한 번 전달된다
#[tokio::test]
async fn test_delay_ack_block_one() {
    let mut server = bind_raw(300).await;
    let server_addr = server.local_addr().unwrap();
    let mut client = bind_raw(1000).await;

    let delay = Duration::from_millis(400);
    let plan = FaultPlan {
        rule: FaultRule::new(Opcode::Ack).on_block(1),
        action: FaultAction::Delay(delay),
    };
    let (relay_addr, relay) = start_relay(server_addr, Some(plan)).await;

    // 전송 수립: RRQ와 DATA#1은 규칙에 걸리지 않는다
    client.send_raw(&rrq("a.txt"), relay_addr).await.unwrap();
    let _ = server.recv_raw().await.unwrap();
    server.send_raw(&data(1, b"x"), relay_addr).await.unwrap();
    let (first, _) = client.recv_raw().await.unwrap();
    assert_eq!(first, data(1, b"x"));

    let started = Instant::now();
    client.send_raw(&ack(1), relay_addr).await.unwrap();

    // 지연 경과 전에는 아무것도 오지 않는다 (서버 타임아웃 300ms)
    assert!(matches!(server.recv_raw().await, Err(Error::Timeout)));

    let (delayed, _) = loop {
        match server.recv_raw().await {
            Ok(pair) => break pair,
            Err(Error::Timeout) => continue,
            Err(e) => panic!("수신 실패: {e}"),
        }
    };
    assert_eq!(delayed, ack(1));
    assert!(started.elapsed() >= delay);

    // 추가 전달은 없다
    assert!(matches!(server.recv_raw().await, Err(Error::Timeout)));

    relay.abort();
}

/// Duplicate(DATA): 같은 패킷이 두 번 전달된다
#[tokio::test]
async fn test_duplicate_data_forwards_twice() {
    let mut server = bind_raw(1000).await;
    let server_addr = server.local_addr().unwrap();
    let mut client = bind_raw(500).await;

    let plan = FaultPlan {
        rule: FaultRule::new(Opcode::Data),
        action: FaultAction::Duplicate,
    };
    let (relay_addr, relay) = start_relay(server_addr, Some(plan)).await;

    client.send_raw(&rrq("a.txt"), relay_addr).await.unwrap();
    let _ = server.recv_raw().await.unwrap();

    server.send_raw(&data(1, b"dup"), relay_addr).await.unwrap();
    let (first, _) = client.recv_raw().await.unwrap();
    let (second, _) = client.recv_raw().await.unwrap();
    assert_eq!(first, data(1, b"dup"));
    assert_eq!(second, first);

    relay.abort();
}

/// Duplicate(RRQ): 요청은 새 전송 경로로 재전송되어 서버에 두 번 도착한다
#[tokio::test]
async fn test_duplicate_request_reestablishes() {
    let mut server = bind_raw(1000).await;
    let server_addr = server.local_addr().unwrap();
    let mut client = bind_raw(1000).await;

    let plan = FaultPlan {
        rule: FaultRule::new(Opcode::Rrq),
        action: FaultAction::Duplicate,
    };
    let (relay_addr, relay) = start_relay(server_addr, Some(plan)).await;

    client.send_raw(&rrq("a.txt"), relay_addr).await.unwrap();

    // 서버는 요청을 두 번 받는다 (원본 + 재수립)
    let (req1, _) = server.recv_raw().await.unwrap();
    let (req2, _) = server.recv_raw().await.unwrap();
    assert_eq!(req1, rrq("a.txt"));
    assert_eq!(req2, rrq("a.txt"));

    // 두 응답 모두 클라이언트로 회신된다
    server.send_raw(&data(1, b"a"), relay_addr).await.unwrap();
    server.send_raw(&data(1, b"a"), relay_addr).await.unwrap();
    let (reply1, _) = client.recv_raw().await.unwrap();
    let (reply2, _) = client.recv_raw().await.unwrap();
    assert_eq!(reply1, data(1, b"a"));
    assert_eq!(reply2, data(1, b"a"));

    relay.abort();
}

/// InvalidOpcode(DATA): 정의되지 않은 opcode의 4바이트 패킷이 먼저 오고,
/// 그 다음 원본이 온다
#[tokio::test]
async fn test_invalid_opcode_precedes_original() {
    let mut server = bind_raw(1000).await;
    let server_addr = server.local_addr().unwrap();
    let mut client = bind_raw(500).await;

    let plan = FaultPlan {
        rule: FaultRule::new(Opcode::Data),
        action: FaultAction::InvalidOpcode,
    };
    let (relay_addr, relay) = start_relay(server_addr, Some(plan)).await;

    client.send_raw(&rrq("a.txt"), relay_addr).await.unwrap();
    let _ = server.recv_raw().await.unwrap();

    server.send_raw(&data(1, b"ok"), relay_addr).await.unwrap();
    let (synthetic, _) = client.recv_raw().await.unwrap();
    assert_eq!(synthetic, vec![0, 0, 0, 0]);
    assert!(Message::decode(&synthetic).is_err());

    let (original, _) = client.recv_raw().await.unwrap();
    assert_eq!(original, data(1, b"ok"));

    relay.abort();
}

/// InvalidTid(ACK): 등록된 적 없는 일회용 주소에서 먼저 오고, 원본은
/// 정상 경로(릴레이 주소)로 온다
#[tokio::test]
async fn test_invalid_tid_sends_from_oneshot_endpoint() {
    let mut server = bind_raw(2000).await;
    let server_addr = server.local_addr().unwrap();
    let mut client = bind_raw(1000).await;

    let plan = FaultPlan {
        rule: FaultRule::new(Opcode::Ack),
        action: FaultAction::InvalidTid,
    };
    let (relay_addr, relay) = start_relay(server_addr, Some(plan)).await;

    client.send_raw(&rrq("a.txt"), relay_addr).await.unwrap();
    let _ = server.recv_raw().await.unwrap();
    server.send_raw(&data(1, b"x"), relay_addr).await.unwrap();
    let _ = client.recv_raw().await.unwrap();

    client.send_raw(&ack(1), relay_addr).await.unwrap();

    let (from_oneshot, oneshot_addr) = server.recv_raw().await.unwrap();
    assert_eq!(from_oneshot, ack(1));
    assert_ne!(oneshot_addr, relay_addr);

    let (from_relay, relay_src) = server.recv_raw().await.unwrap();
    assert_eq!(from_relay, ack(1));
    assert_eq!(relay_src, relay_addr);

    relay.abort();
}

/// ExtendPacket(DATA): 페이로드가 512바이트를 넘도록 패딩되어 전달된다
#[tokio::test]
async fn test_extend_packet_oversizes_payload() {
    let mut server = bind_raw(1000).await;
    let server_addr = server.local_addr().unwrap();
    let mut client = bind_raw(500).await;

    let plan = FaultPlan {
        rule: FaultRule::new(Opcode::Data),
        action: FaultAction::ExtendPacket,
    };
    let (relay_addr, relay) = start_relay(server_addr, Some(plan)).await;

    client.send_raw(&rrq("a.txt"), relay_addr).await.unwrap();
    let _ = server.recv_raw().await.unwrap();

    server
        .send_raw(&data(1, b"Hello World"), relay_addr)
        .await
        .unwrap();
    let (padded, _) = client.recv_raw().await.unwrap();

    // 헤더는 보존되고 길이는 상한을 넘어 코덱에서 거부된다
    assert_eq!(&padded[..4], &[0, 3, 0, 1]);
    assert!(padded.len() > 4 + btp::MAX_BLOCK_SIZE);
    assert!(matches!(
        Message::decode(&padded),
        Err(Error::Malformed { .. })
    ));

    relay.abort();
}
