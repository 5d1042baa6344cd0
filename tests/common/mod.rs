//! 통합 테스트 공용 헬퍼

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use btp::{
    Config, DirAccessor, Error, Message, ReceiveSession, RequestKind, SessionHandler,
    TransferSocket, TransmitSession,
};

/// 루프백 테스트용 설정 (drain을 빨리 끝내기 위한 짧은 타임아웃)
pub fn test_config() -> Config {
    Config {
        session_timeout: Duration::from_millis(300),
        relay_timeout: Duration::from_millis(300),
        ..Config::default()
    }
}

/// 임시 포트에서 요청을 받아 전송마다 워커를 띄우는 미니 서버
///
/// 반환된 핸들을 abort하면 멈춘다.
pub async fn start_server(root: PathBuf, config: Config) -> (SocketAddr, JoinHandle<()>) {
    let mut acceptor =
        TransferSocket::bind("127.0.0.1:0".parse().unwrap(), Duration::from_millis(100))
            .await
            .unwrap();
    let addr = acceptor.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        loop {
            let (bytes, from) = match acceptor.recv_raw().await {
                Ok(pair) => pair,
                Err(Error::Timeout) => continue,
                Err(_) => break,
            };
            let Ok(Message::Request { kind, filename, .. }) = Message::decode(&bytes) else {
                continue;
            };

            let root = root.clone();
            let config = config.clone();
            tokio::spawn(async move {
                let socket =
                    TransferSocket::bind("127.0.0.1:0".parse().unwrap(), config.session_timeout)
                        .await
                        .unwrap();
                let handler = SessionHandler::new(Arc::new(DirAccessor::new(root)));
                let _ = match kind {
                    RequestKind::Read => {
                        match TransmitSession::answer_read(socket, from, &filename, handler, &config)
                            .await
                        {
                            Ok(session) => session.run().await.map(|_| ()),
                            Err(e) => Err(e),
                        }
                    }
                    RequestKind::Write => {
                        match ReceiveSession::answer_write(
                            socket, from, &filename, handler, &config,
                        )
                        .await
                        {
                            Ok(session) => session.run().await.map(|_| ()),
                            Err(e) => Err(e),
                        }
                    }
                };
            });
        }
    });

    (addr, handle)
}

/// 짧은 타임아웃의 루프백 소켓
pub async fn bind_raw(timeout_ms: u64) -> TransferSocket {
    TransferSocket::bind(
        "127.0.0.1:0".parse().unwrap(),
        Duration::from_millis(timeout_ms),
    )
    .await
    .unwrap()
}
