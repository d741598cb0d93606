//! ARQ 송신자
//!
//! 파일(또는 테스트 데이터)을 프레임으로 나눠 선택한 ARQ 프로토콜로 전송.
//! 데이터 프레임 손실은 송신측에서 시뮬레이션.
//!
//! 사용법:
//!   cargo run --release --bin arq-sender -- [OPTIONS]
//!
//! 예시:
//!   # Go-Back-N, 윈도우 4
//!   cargo run --release --bin arq-sender -- --file data.txt --protocol 2 --window 4
//!
//!   # Selective-Repeat, 프레임 손실 20%
//!   cargo run --release --bin arq-sender -- -f data.txt -P 3 --frame-delivery 0.8

use std::error::Error as StdError;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use arqlink::transport;
use arqlink::{Config, FrameStore, Protocol, DEFAULT_PORT};

/// 송신자 실행 옵션
struct SenderOptions {
    host: String,
    port: u16,
    file_path: Option<PathBuf>,
    config: Config,
}

impl Default for SenderOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            file_path: None,
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

fn parse_args() -> Result<SenderOptions, Box<dyn StdError>> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = SenderOptions::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                let path: PathBuf = value(&args, i, "--config")?;
                options.config = Config::load(path)?;
                i += 1;
            }
            "--host" | "-H" => {
                options.host = value(&args, i, "--host")?;
                i += 1;
            }
            "--port" | "-p" => {
                options.port = value(&args, i, "--port")?;
                i += 1;
            }
            "--file" | "-f" => {
                options.file_path = Some(value(&args, i, "--file")?);
                i += 1;
            }
            "--protocol" | "-P" => {
                let id: u8 = value(&args, i, "--protocol")?;
                options.config = options.config.clone().with_protocol(Protocol::from_id(id)?);
                i += 1;
            }
            "--window" | "-w" => {
                options.config.window_size = value(&args, i, "--window")?;
                i += 1;
            }
            "--frame-delivery" => {
                options.config.frame_delivery_probability =
                    value(&args, i, "--frame-delivery")?;
                i += 1;
            }
            "--timeout-ms" | "-t" => {
                options.config.timeout_ms = value(&args, i, "--timeout-ms")?;
                i += 1;
            }
            "--payload-size" => {
                options.config.payload_size = value(&args, i, "--payload-size")?;
                i += 1;
            }
            "--max-attempts" => {
                options.config.max_attempts = Some(value(&args, i, "--max-attempts")?);
                i += 1;
            }
            "--seed" => {
                options.config.rng_seed = Some(value(&args, i, "--seed")?);
                i += 1;
            }
            "--help" | "-h" => {
                println!(
                    r#"ARQ Sender - Stop-and-Wait / Go-Back-N / Selective-Repeat 송신자

사용법:
  cargo run --release --bin arq-sender -- [OPTIONS]

옵션:
  -c, --config <PATH>      TOML 설정 파일 (다른 옵션보다 먼저 지정)
  -H, --host <HOST>        수신자 주소 (기본: 127.0.0.1)
  -p, --port <PORT>        수신자 포트 (기본: 9000)
  -f, --file <PATH>        전송할 파일 경로
  -P, --protocol <ID>      1=Stop-and-Wait, 2=Go-Back-N, 3=Selective-Repeat (기본: 2)
  -w, --window <N>         윈도우 크기 (기본: 3)
  -t, --timeout-ms <MS>    재전송 타이머 (기본: 5000)
  --frame-delivery <P>     프레임 전달 확률 (기본: 0.95)
  --payload-size <BYTES>   프레임 페이로드 크기 (기본: 46)
  --max-attempts <N>       프레임당 최대 전송 횟수 (기본: 무제한)
  --seed <N>               손실 난수 시드
  -h, --help               이 도움말 출력

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
    let config = &options.config;
    let integrity = config.integrity.build();

    // 전송할 데이터 준비
    let store = if let Some(path) = &options.file_path {
        info!("Loading file: {:?}", path);
        FrameStore::from_file(path, config.payload_size, integrity.as_ref())?
    } else {
        info!("Using test data");
        let data: Vec<u8> = (0..config.payload_size * 7)
            .map(|i| b'a' + (i % 26) as u8)
            .collect();
        FrameStore::split(&data, config.payload_size, integrity.as_ref())?
    };

    info!("Protocol: {}", config.protocol);
    info!("Frames: {} x {} bytes", store.len(), config.payload_size);
    info!("Window: {}", config.effective_window());
    info!("Timeout: {:?}", config.timeout());
    info!(
        "Frame delivery probability: {:.1}%",
        config.frame_delivery_probability * 100.0
    );

    let addr = format!("{}:{}", options.host, options.port);
    let stats = transport::connect(addr, config, store).await?;

    info!("Transfer complete");
    info!("{}", stats.summary());
    for (seq, elapsed) in &stats.ack_times {
        info!("  frame {}: {:.1}ms", seq, elapsed.as_secs_f64() * 1000.0);
    }
    info!(
        "Total time for all frames: {:.1}ms",
        stats.total_ack_time().as_secs_f64() * 1000.0
    );

    Ok(())
}
