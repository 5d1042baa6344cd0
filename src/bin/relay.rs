//! BTP 릴레이 - 장애 주입 중계기
//!
//! 클라이언트와 서버 사이에서 패킷을 중계하며, 지정한 규칙에 걸린
//! 패킷에 장애(손실/지연/중복/변조)를 주입한다. 규칙이 없으면 투명 릴레이.
//!
//! 사용법:
//!   cargo run --release --bin btp-relay -- [OPTIONS]
//!
//! 예시:
//!   # 투명 릴레이
//!   cargo run --release --bin btp-relay -- --listen 0.0.0.0:23 --server 127.0.0.1:69
//!
//!   # DATA 블록 1 손실
//!   cargo run --release --bin btp-relay -- --fault lose --match data --block 1
//!
//!   # ACK 블록 1을 1초 지연, 이후 10블록마다 반복
//!   cargo run --release --bin btp-relay -- --fault delay --match ack --block 1 --every 10

use std::net::SocketAddr;
use std::time::Duration;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use btp::{Config, FaultAction, FaultPlan, FaultRule, Opcode, Relay};

/// 릴레이 설정
struct RelayArgs {
    listen_addr: SocketAddr,
    server_addr: SocketAddr,
    fault: Option<String>,
    match_kind: Opcode,
    block: Option<u16>,
    every: Option<u16>,
    delay_ms: u64,
    config: Config,
    verbose: bool,
}

impl Default for RelayArgs {
    fn default() -> Self {
        Self {
            listen_addr: format!("0.0.0.0:{}", btp::DEFAULT_RELAY_PORT)
                .parse()
                .unwrap(),
            server_addr: format!("127.0.0.1:{}", btp::DEFAULT_SERVER_PORT)
                .parse()
                .unwrap(),
            fault: None,
            match_kind: Opcode::Data,
            block: None,
            every: None,
            delay_ms: 1000,
            config: Config::default(),
            verbose: false,
        }
    }
}

fn parse_args() -> RelayArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = RelayArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--listen" | "-l" => {
                if i + 1 < args.len() {
                    parsed.listen_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--server" | "-s" => {
                if i + 1 < args.len() {
                    parsed.server_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--fault" | "-f" => {
                if i + 1 < args.len() {
                    parsed.fault = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--match" | "-m" => {
                if i + 1 < args.len() {
                    parsed.match_kind =
                        Opcode::from_name(&args[i + 1]).expect("rrq|wrq|data|ack|error 중 하나");
                    i += 1;
                }
            }
            "--block" => {
                if i + 1 < args.len() {
                    parsed.block = Some(args[i + 1].parse().expect("유효한 숫자 필요"));
                    i += 1;
                }
            }
            "--every" => {
                if i + 1 < args.len() {
                    parsed.every = Some(args[i + 1].parse().expect("유효한 숫자 필요"));
                    i += 1;
                }
            }
            "--delay-ms" => {
                if i + 1 < args.len() {
                    parsed.delay_ms = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--timeout-ms" => {
                if i + 1 < args.len() {
                    let ms: u64 = args[i + 1].parse().expect("유효한 숫자 필요");
                    parsed.config.relay_timeout = Duration::from_millis(ms);
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                parsed.verbose = true;
            }
            "--help" | "-h" => {
                println!(
                    r#"BTP Relay - 장애 주입 중계기

클라이언트와 서버 사이에서 패킷을 중계하며 규칙에 걸린 패킷에
장애를 주입한다. 규칙이 없으면 투명 릴레이.

사용법:
  cargo run --release --bin btp-relay -- [OPTIONS]

옵션:
  -l, --listen <ADDR>   수신 주소 (기본: 0.0.0.0:23)
  -s, --server <ADDR>   서버 well-known 주소 (기본: 127.0.0.1:69)
  -f, --fault <KIND>    lose|delay|duplicate|invalid-opcode|invalid-tid|extend
  -m, --match <TYPE>    대상 메시지 종류 rrq|wrq|data|ack|error (기본: data)
  --block <N>           대상 블록 번호
  --every <N>           매칭마다 대상 블록 전진 간격
  --delay-ms <MS>       delay 장애의 지연 시간 (기본: 1000)
  --timeout-ms <MS>     수신 poll 타임아웃 (기본: 1000)
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

    let plan = match &args.fault {
        Some(fault) => {
            let action = FaultAction::from_name(fault, Duration::from_millis(args.delay_ms))
                .expect("lose|delay|duplicate|invalid-opcode|invalid-tid|extend 중 하나");
            let mut rule = FaultRule::new(args.match_kind);
            if let Some(block) = args.block {
                rule = rule.on_block(block);
            }
            if let Some(every) = args.every {
                rule = rule.repeat_every(every);
            }
            Some(FaultPlan { rule, action })
        }
        None => None,
    };

    info!("BTP Relay starting...");
    let relay = Relay::bind(args.listen_addr, args.server_addr, plan, &args.config).await?;

    tokio::select! {
        result = relay.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("종료 신호 수신, 릴레이 중단");
        }
    }

    Ok(())
}
