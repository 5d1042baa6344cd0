//! BTP 서버 - Block Transfer Protocol
//!
//! stop-and-wait 블록 전송 프로토콜 서버
//! - 요청마다 임시 TID의 워커 태스크를 띄워 세션을 격리
//! - ctrl-c 시 수신을 멈추고 진행 중인 전송이 끝나기를 기다림
//!
//! 사용법:
//!   cargo run --release --bin btp-server -- [OPTIONS]
//!
//! 예시:
//!   # 기본 구동 (현재 디렉터리 공유)
//!   cargo run --release --bin btp-server -- --bind 0.0.0.0:69
//!
//!   # 디렉터리와 타임아웃 지정
//!   cargo run --release --bin btp-server -- -d ./files --timeout-ms 3000

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinSet;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use btp::{
    Config, DirAccessor, Error, Message, ReceiveSession, RequestKind, SessionHandler,
    TransferSocket, TransmitSession,
};

/// 서버 설정
struct ServerArgs {
    bind_addr: SocketAddr,
    root: PathBuf,
    config: Config,
    verbose: bool,
}

impl Default for ServerArgs {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", btp::DEFAULT_SERVER_PORT)
                .parse()
                .unwrap(),
            root: PathBuf::from("."),
            config: Config::default(),
            verbose: false,
        }
    }
}

/// 전체 전송 집계
#[derive(Debug, Default, Clone, Copy)]
struct ServerTotals {
    completed: u64,
    failed: u64,
}

fn parse_args() -> ServerArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = ServerArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    parsed.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--dir" | "-d" => {
                if i + 1 < args.len() {
                    parsed.root = PathBuf::from(&args[i + 1]);
                    parsed.config.resource_dir = parsed.root.clone();
                    i += 1;
                }
            }
            "--timeout-ms" => {
                if i + 1 < args.len() {
                    let ms: u64 = args[i + 1].parse().expect("유효한 숫자 필요");
                    parsed.config.session_timeout = Duration::from_millis(ms);
                    i += 1;
                }
            }
            "--attempts" => {
                if i + 1 < args.len() {
                    parsed.config.max_transmit_attempts =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                parsed.verbose = true;
            }
            "--help" | "-h" => {
                println!(
                    r#"BTP Server - Block Transfer Protocol 서버

stop-and-wait 블록 전송 프로토콜 서버
- 요청마다 임시 TID 워커로 세션 격리
- ctrl-c 시 진행 중인 전송 완료 대기

사용법:
  cargo run --release --bin btp-server -- [OPTIONS]

옵션:
  -b, --bind <ADDR>     바인드 주소 (기본: 0.0.0.0:69)
  -d, --dir <PATH>      공유 디렉터리 (기본: .)
  --timeout-ms <MS>     세션 수신 타임아웃 (기본: 5000)
  --attempts <N>        최대 재전송 횟수 (기본: 5)
  -v, --verbose         디버그 로그 출력
  -h, --help            이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    parsed
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("BTP Server starting...");
    info!("Bind address: {}", args.bind_addr);
    info!("Shared directory: {:?}", args.root);
    info!("Session timeout: {:?}", args.config.session_timeout);

    let mut acceptor = TransferSocket::bind(args.bind_addr, Duration::from_secs(1)).await?;
    info!("Server listening on {}", acceptor.local_addr()?);

    let totals = Arc::new(RwLock::new(ServerTotals::default()));
    let mut workers: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("종료 신호 수신");
                break;
            }
            received = acceptor.recv_raw() => {
                let (bytes, from) = match received {
                    Ok(pair) => pair,
                    Err(Error::Timeout) => continue,
                    Err(e) => {
                        warn!("수신 에러: {}", e);
                        break;
                    }
                };

                match Message::decode(&bytes) {
                    Ok(Message::Request { kind, filename, mode: _ }) => {
                        info!("요청 수신: {:?} {} from {}", kind, filename, from);
                        spawn_worker(&mut workers, kind, filename, from, &args, &totals);
                    }
                    Ok(other) => {
                        warn!("요청이 아닌 메시지 무시: {} from {}", other.kind_name(), from);
                        let err = Message::Error {
                            code: btp::ErrorCode::IllegalOperation,
                            message: btp::ErrorCode::IllegalOperation.default_text().into(),
                        };
                        let _ = acceptor.send(&err, from).await;
                    }
                    Err(e) => {
                        warn!("잘못된 패킷 무시: {} from {}", e, from);
                    }
                }
            }
        }

        // 끝난 워커 회수
        while workers.try_join_next().is_some() {}
    }

    info!("진행 중 전송 {}건 완료 대기", workers.len());
    while workers.join_next().await.is_some() {}

    let totals = *totals.read();
    info!(
        "서버 종료: 완료 {}건, 실패 {}건",
        totals.completed, totals.failed
    );
    Ok(())
}

/// 전송 하나를 전담할 워커 태스크 기동
fn spawn_worker(
    workers: &mut JoinSet<()>,
    kind: RequestKind,
    filename: String,
    peer: SocketAddr,
    args: &ServerArgs,
    totals: &Arc<RwLock<ServerTotals>>,
) {
    let config = args.config.clone();
    let root = config.resource_dir.clone();
    let totals = totals.clone();

    workers.spawn(async move {
        let socket = match TransferSocket::bind(
            "0.0.0.0:0".parse().expect("고정 주소"),
            config.session_timeout,
        )
        .await
        {
            Ok(socket) => socket,
            Err(e) => {
                warn!("워커 소켓 바인딩 실패: {}", e);
                totals.write().failed += 1;
                return;
            }
        };

        let counters = totals.clone();
        let handler = SessionHandler::new(Arc::new(DirAccessor::new(root)))
            .with_completed(move |status| {
                let mut totals = counters.write();
                if status.success {
                    totals.completed += 1;
                } else {
                    totals.failed += 1;
                }
            });

        let result = match kind {
            RequestKind::Read => {
                match TransmitSession::answer_read(socket, peer, &filename, handler, &config).await
                {
                    Ok(session) => session.run().await,
                    Err(e) => Err(e),
                }
            }
            RequestKind::Write => {
                match ReceiveSession::answer_write(socket, peer, &filename, handler, &config).await
                {
                    Ok(session) => session.run().await,
                    Err(e) => Err(e),
                }
            }
        };

        match result {
            Ok(stats) => info!(
                "전송 완료: {} ({:.2} KB/s)",
                filename,
                stats.throughput() / 1000.0
            ),
            Err(e) => warn!("전송 실패: {} ({})", filename, e),
        }
    });
}
