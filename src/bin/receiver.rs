//! ARQ 수신자
//!
//! TCP 연결을 받아 세션 설정에 맞는 프로토콜로 프레임을 수신.
//! ACK/NAK 손실은 수신측에서 시뮬레이션.
//!
//! 사용법:
//!   cargo run --release --bin arq-receiver -- [OPTIONS]
//!
//! 예시:
//!   # 기본 수신
//!   cargo run --release --bin arq-receiver -- --port 9000 --output received.bin
//!
//!   # ACK 손실 20%
//!   cargo run --release --bin arq-receiver -- -p 9000 --ack-delivery 0.8

use std::error::Error as StdError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use arqlink::transport;
use arqlink::{Config, DEFAULT_PORT};

/// 수신자 실행 옵션
struct ReceiverOptions {
    bind_addr: SocketAddr,
    output_path: Option<PathBuf>,
    once: bool,
    config: Config,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            output_path: None,
            once: false,
            config: Config::default(),
        }
    }
}

fn value<T>(args: &[String], i: usize, flag: &str) -> Result<T, Box<dyn StdError>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = args
        .get(i + 1)
        .ok_or_else(|| format!("{flag}: 값이 필요함"))?;
    raw.parse()
        .map_err(|e| format!("{flag} {raw:?}: {e}").into())
}

fn parse_args() -> Result<ReceiverOptions, Box<dyn StdError>> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = ReceiverOptions::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                let path: PathBuf = value(&args, i, "--config")?;
                options.config = Config::load(path)?;
                i += 1;
            }
            "--port" | "-p" => {
                let port: u16 = value(&args, i, "--port")?;
                options.bind_addr.set_port(port);
                i += 1;
            }
            "--bind" | "-b" => {
                options.bind_addr = value(&args, i, "--bind")?;
                i += 1;
            }
            "--output" | "-o" => {
                options.output_path = Some(value(&args, i, "--output")?);
                i += 1;
            }
            "--ack-delivery" => {
                options.config.ack_delivery_probability = value(&args, i, "--ack-delivery")?;
                i += 1;
            }
            "--window" | "-w" => {
                options.config.window_size = value(&args, i, "--window")?;
                i += 1;
            }
            "--seed" => {
                options.config.rng_seed = Some(value(&args, i, "--seed")?);
                i += 1;
            }
            "--once" => options.once = true,
            "--help" | "-h" => {
                println!(
                    r#"ARQ Receiver - Stop-and-Wait / Go-Back-N / Selective-Repeat 수신자

사용법:
  cargo run --release --bin arq-receiver -- [OPTIONS]

옵션:
  -c, --config <PATH>     TOML 설정 파일 (다른 옵션보다 먼저 지정)
  -p, --port <PORT>       수신 포트 (기본: 9000)
  -b, --bind <ADDR>       바인드 주소 (기본: 0.0.0.0:9000)
  -o, --output <PATH>     수신 데이터 저장 경로
  -w, --window <N>        Selective-Repeat 수신 윈도우 (기본: 3)
  --ack-delivery <P>      ACK/NAK 전달 확률 (기본: 0.95)
  --seed <N>              손실 난수 시드
  --once                  세션 하나만 처리하고 종료
  -h, --help              이 도움말 출력

로그 레벨은 RUST_LOG 환경 변수로 조정 (예: RUST_LOG=arqlink=debug)
"#
                );
                std::process::exit(0);
            }
            other => warn!("알 수 없는 옵션 무시: {}", other),
        }
        i += 1;
    }

    options.config.validate()?;
    Ok(options)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn StdError>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let options = parse_args()?;

    let listener = TcpListener::bind(options.bind_addr).await?;
    info!("Receiver listening on {}", options.bind_addr);
    info!(
        "ACK delivery probability: {:.1}%",
        options.config.ack_delivery_probability * 100.0
    );

    loop {
        let (stream, peer) = listener.accept().await?;
        info!("Connection from {}", peer);

        match transport::serve(stream, &options.config).await {
            Ok(report) => {
                info!(
                    "{}: {}/{} frames delivered",
                    report.setup.protocol,
                    report.delivered.len(),
                    report.setup.total_frames
                );
                info!("{}", report.stats.summary());

                if let Some(path) = &options.output_path {
                    let data: Vec<u8> = report
                        .delivered
                        .iter()
                        .flat_map(|(_, payload)| payload.iter().copied())
                        .collect();
                    std::fs::write(path, &data)?;
                    info!("Saved {} bytes to {:?}", data.len(), path);
                }
            }
            Err(e) => warn!("세션 실패 ({}): {}", peer, e),
        }

        if options.once {
            break;
        }
    }

    Ok(())
}
