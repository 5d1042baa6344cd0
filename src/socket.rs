//! 전송 소켓
//!
//! 코덱과 UDP 엔드포인트를 묶는 얇은 래퍼. 모든 수신은 타임아웃으로
//! 제한되며, 타임아웃은 [`Error::Timeout`]으로 구분되어 호출자가
//! 재시도/재전송을 결정한다.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::message::Message;
use crate::{Error, Result};

/// 수신 버퍼 크기
///
/// 규격 상한(4 + 512)보다 크게 잡아 초과 길이 패킷도 잘리지 않고
/// 관찰되도록 한다 (릴레이의 패딩 장애 검증용).
const RECV_BUF_SIZE: usize = 2048;

/// 코덱이 결합된 데이터그램 소켓
pub struct TransferSocket {
    socket: UdpSocket,
    timeout: Duration,
    buf: Vec<u8>,
}

impl TransferSocket {
    /// 주소에 바인딩. 포트 0이면 임시 포트(TID)가 할당된다.
    pub async fn bind(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            timeout,
            buf: vec![0u8; RECV_BUF_SIZE],
        })
    }

    /// 바인딩된 로컬 주소 (이 엔드포인트의 TID)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 수신 타임아웃
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 메시지 인코딩 후 전송
    pub async fn send(&self, msg: &Message, to: SocketAddr) -> Result<()> {
        self.socket.send_to(&msg.encode(), to).await?;
        Ok(())
    }

    /// 메시지 하나 수신 및 디코딩
    ///
    /// 디코딩 실패는 [`Error::Malformed`]로 반환된다. 송신자 주소까지
    /// 필요한 호출자는 [`recv_raw`](Self::recv_raw) 후 직접 디코딩한다.
    pub async fn recv(&mut self) -> Result<(Message, SocketAddr)> {
        let (bytes, from) = self.recv_raw().await?;
        let msg = Message::decode(&bytes)?;
        Ok((msg, from))
    }

    /// 원시 바이트 전송 (릴레이/장애 주입용)
    pub async fn send_raw(&self, bytes: &[u8], to: SocketAddr) -> Result<()> {
        self.socket.send_to(bytes, to).await?;
        Ok(())
    }

    /// 원시 데이터그램 하나 수신
    pub async fn recv_raw(&mut self) -> Result<(Vec<u8>, SocketAddr)> {
        match tokio::time::timeout(self.timeout, self.socket.recv_from(&mut self.buf)).await {
            Ok(Ok((len, from))) => Ok((self.buf[..len].to_vec(), from)),
            Ok(Err(e)) => Err(Error::Io(e)),
            Err(_) => Err(Error::Timeout),
        }
    }
}
