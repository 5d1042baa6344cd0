//! BTP 클라이언트 - Block Transfer Protocol
//!
//! 파일 하나를 서버(또는 릴레이)에서 받거나(get) 올린다(put)
//!
//! 사용법:
//!   cargo run --release --bin btp-client -- [OPTIONS]
//!
//! 예시:
//!   # 파일 받기
//!   cargo run --release --bin btp-client -- --server 127.0.0.1:69 --get a.txt
//!
//!   # 파일 올리기 (릴레이 경유)
//!   cargo run --release --bin btp-client -- -s 127.0.0.1:23 --put up.bin

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use btp::{
    Config, DirAccessor, Mode, ReceiveSession, SessionHandler, TransferSocket, TransmitSession,
};

/// 수행할 작업
enum Operation {
    Get(String),
    Put(String),
}

/// 클라이언트 설정
struct ClientArgs {
    server_addr: SocketAddr,
    op: Option<Operation>,
    dir: PathBuf,
    mode: Mode,
    config: Config,
    verbose: bool,
}

impl Default for ClientArgs {
    fn default() -> Self {
        Self {
            server_addr: format!("127.0.0.1:{}", btp::DEFAULT_SERVER_PORT)
                .parse()
                .unwrap(),
            op: None,
            dir: PathBuf::from("."),
            mode: Mode::Octet,
            config: Config::default(),
            verbose: false,
        }
    }
}

fn parse_args() -> ClientArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = ClientArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--server" | "-s" => {
                if i + 1 < args.len() {
                    parsed.server_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--get" | "-g" => {
                if i + 1 < args.len() {
                    parsed.op = Some(Operation::Get(args[i + 1].clone()));
                    i += 1;
                }
            }
            "--put" | "-p" => {
                if i + 1 < args.len() {
                    parsed.op = Some(Operation::Put(args[i + 1].clone()));
                    i += 1;
                }
            }
            "--dir" | "-d" => {
                if i + 1 < args.len() {
                    parsed.dir = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--mode" => {
                if i + 1 < args.len() {
                    parsed.mode = Mode::parse(&args[i + 1]).expect("netascii|octet|mail 중 하나");
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
                    r#"BTP Client - Block Transfer Protocol 클라이언트

파일 하나를 받거나(get) 올린다(put)

사용법:
  cargo run --release --bin btp-client -- [OPTIONS]

옵션:
  -s, --server <ADDR>   서버/릴레이 주소 (기본: 127.0.0.1:69)
  -g, --get <NAME>      파일 받기
  -p, --put <NAME>      파일 올리기
  -d, --dir <PATH>      로컬 디렉터리 (기본: .)
  --mode <MODE>         전송 모드 netascii|octet|mail (기본: octet)
  --timeout-ms <MS>     수신 타임아웃 (기본: 5000)
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

    let Some(op) = &args.op else {
        eprintln!("--get 또는 --put 필요 (--help 참고)");
        std::process::exit(1);
    };

    let socket = TransferSocket::bind(
        "0.0.0.0:0".parse().expect("고정 주소"),
        args.config.session_timeout,
    )
    .await?;
    info!("로컬 TID: {}", socket.local_addr()?);

    let handler = SessionHandler::new(Arc::new(DirAccessor::new(args.dir.clone())));

    let stats = match op {
        Operation::Get(name) => {
            info!("GET {} from {}", name, args.server_addr);
            let session = ReceiveSession::initiate_read(
                socket,
                args.server_addr,
                name,
                args.mode,
                handler,
                &args.config,
            )
            .await?;
            session.run().await?
        }
        Operation::Put(name) => {
            info!("PUT {} to {}", name, args.server_addr);
            let session = TransmitSession::initiate_write(
                socket,
                args.server_addr,
                name,
                args.mode,
                handler,
                &args.config,
            )
            .await?;
            session.run().await?
        }
    };

    info!("전송 성공!");
    info!(
        "  블록: 송신 {} / 수신 {}",
        stats.blocks_sent, stats.blocks_received
    );
    info!(
        "  바이트: 송신 {} / 수신 {}",
        stats.bytes_sent, stats.bytes_received
    );
    info!("  재전송: {}회", stats.retransmits);
    info!("  시간: {:.2}s", stats.elapsed().as_secs_f64());
    info!("  처리율: {:.2} KB/s", stats.throughput() / 1000.0);

    Ok(())
}
