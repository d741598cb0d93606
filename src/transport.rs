//! TCP 줄 단위 전송
//!
//! 실제 연결 위에 엔진을 올림. TCP 자체는 손실이 없으므로
//! 손실은 각 엔진의 송신 방향에서 `LossyChannel`로 주입:
//! - 송신측(`connect`): 데이터 프레임 손실
//! - 수신측(`serve`): ACK/NAK 손실
//!
//! 줄 형식은 `wire` 모듈 참조. 해석할 수 없는 줄은 세션을 종료시키는 에러.

use std::fmt::Display;
use std::io::ErrorKind;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::channel::{Bernoulli, LossyChannel};
use crate::frame::FrameStore;
use crate::receiver::{Delivery, Receiver};
use crate::sender::Sender;
use crate::stats::TransferStats;
use crate::wire::{self, Feedback, SessionSetup};
use crate::{Config, Error, Result};

/// 수신측 세션 결과
#[derive(Debug, Clone)]
pub struct ServeReport {
    pub setup: SessionSetup,
    pub delivered: Vec<Delivery>,
    pub stats: TransferStats,
}

/// 큐의 메시지를 한 줄씩 쓰고, 큐가 닫히면 쓰기 방향을 닫음
fn spawn_line_writer<M, F>(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<M>,
    encode: F,
) -> JoinHandle<Result<()>>
where
    M: Send + 'static,
    F: Fn(&M) -> String + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let mut line = encode(&msg);
            line.push('\n');
            writer.write_all(line.as_bytes()).await?;
        }
        writer.shutdown().await?;
        Ok(())
    })
}

/// 다음 줄 읽기 (연결 종료 시 에러)
async fn expect_line(lines: &mut tokio::io::Lines<BufReader<OwnedReadHalf>>) -> Result<String> {
    lines.next_line().await?.ok_or(Error::ConnectionClosed)
}

fn is_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
    )
}

fn flatten<T>(result: std::result::Result<Result<T>, tokio::task::JoinError>) -> Result<T> {
    result?
}

/// 수신측: 연결 하나에서 세션 하나를 처리
///
/// 세션 설정의 프로토콜이 `config.protocol`보다 우선.
pub async fn serve(stream: TcpStream, config: &Config) -> Result<ServeReport> {
    let peer = stream.peer_addr()?;
    let (read_half, write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let protocol_line = expect_line(&mut lines).await?;
    let total_line = expect_line(&mut lines).await?;
    let setup = SessionSetup::from_lines(&protocol_line, &total_line)?;
    info!(%peer, protocol = %setup.protocol, frames = setup.total_frames, "세션 설정 수신");

    let config = config.clone().with_protocol(setup.protocol);
    let protocol = setup.protocol;

    let (feedback_tx, feedback_rx) = mpsc::unbounded_channel::<Feedback>();
    let writer = spawn_line_writer(write_half, feedback_rx, move |fb: &Feedback| {
        fb.to_line(protocol)
    });
    let feedback = LossyChannel::new(
        feedback_tx,
        Bernoulli::new(config.ack_delivery_probability, config.rng_seed),
    );

    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let (receiver, mut deliveries) = Receiver::new(&config, setup.total_frames, frame_rx, feedback)?;
    let receiver_task = tokio::spawn(receiver.run());

    let read_result: Result<()> = async {
        while let Some(line) = lines.next_line().await? {
            let frame = wire::frame_from_line(&line)?;
            if frame_tx.send(frame).is_err() {
                // 수신자가 먼저 실패함
                break;
            }
        }
        Ok(())
    }
    .await;
    drop(frame_tx);

    let stats = flatten(receiver_task.await)?;
    let writer_result = flatten(writer.await);

    // 모든 프레임을 전달한 뒤 상대가 먼저 끊은 경우는 정상 종료
    let complete = stats.frames_delivered >= setup.total_frames;
    for result in [read_result, writer_result] {
        match result {
            Err(Error::Io(e)) if complete && is_disconnect(&e) => {
                debug!(%peer, error = %e, "전송 완료 후 연결 끊김");
            }
            other => other?,
        }
    }

    let mut delivered = Vec::new();
    while let Some(delivery) = deliveries.recv().await {
        delivered.push(delivery);
    }
    info!(%peer, frames = delivered.len(), "세션 종료");

    Ok(ServeReport {
        setup,
        delivered,
        stats,
    })
}

/// 송신측: 접속 후 프레임 저장소 전체를 전송
pub async fn connect<A>(addr: A, config: &Config, store: FrameStore) -> Result<TransferStats>
where
    A: ToSocketAddrs + Display,
{
    config.validate()?;
    let stream = TcpStream::connect(&addr).await?;
    stream.set_nodelay(true)?;
    info!("{}에 연결됨", addr);
    send_over(stream, config, store).await
}

/// 이미 연결된 스트림 위에서 전송
pub async fn send_over(stream: TcpStream, config: &Config, store: FrameStore) -> Result<TransferStats> {
    let (read_half, mut write_half) = stream.into_split();

    let setup = SessionSetup::new(config.protocol, store.len());
    for line in setup.to_lines() {
        write_half.write_all(format!("{line}\n").as_bytes()).await?;
    }
    debug!(protocol = %setup.protocol, frames = setup.total_frames, "세션 설정 전송");

    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let writer = spawn_line_writer(write_half, frame_rx, wire::frame_to_line);
    let channel = LossyChannel::new(
        frame_tx,
        Bernoulli::new(config.frame_delivery_probability, config.rng_seed),
    );

    // 피드백 읽기 태스크: 잘못된 줄이면 에러로 종료하고 큐를 닫음.
    // 송신자가 끝난 뒤에도 EOF까지 읽어서 버림 (읽지 않은 데이터가 남으면 RST)
    let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();
    let mut reader: JoinHandle<Result<()>> = tokio::spawn(async move {
        let mut lines = BufReader::new(read_half).lines();
        let mut draining = false;
        while let Some(line) = lines.next_line().await? {
            if draining {
                trace!(%line, "완료 후 피드백 버림");
                continue;
            }
            if feedback_tx.send(Feedback::from_line(&line)?).is_err() {
                draining = true;
            }
        }
        Ok(())
    });

    let sender = Sender::new(config, store, channel, feedback_rx)?;
    let result = sender.run().await;

    match result {
        Ok(stats) => {
            // 쓰기 방향을 닫고 상대가 연결을 닫을 때까지 남은 피드백 소비
            flatten(writer.await)?;
            match tokio::time::timeout(config.timeout(), &mut reader).await {
                Ok(joined) => {
                    if let Err(e) = flatten(joined) {
                        debug!(error = %e, "완료 후 피드백 읽기 종료");
                    }
                }
                Err(_) => {
                    debug!("상대가 연결을 닫지 않음, 읽기 중단");
                    reader.abort();
                }
            }
            Ok(stats)
        }
        // 피드백이 끊긴 원인이 읽기 에러라면 그쪽을 보고
        Err(Error::ConnectionClosed) => {
            writer.abort();
            flatten(reader.await)?;
            Err(Error::ConnectionClosed)
        }
        Err(e) => {
            writer.abort();
            reader.abort();
            Err(e)
        }
    }
}
