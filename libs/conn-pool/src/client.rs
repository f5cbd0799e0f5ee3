use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::Serialize;

use barge_api::framing::encode_frame;
use barge_api::{LogEntry, LogResponse, LogResult, StoreError};

/// Потолок на размер ответного фрейма — ответ это пара байт JSON,
/// всё большее означает рассинхронизацию протокола.
const MAX_RESPONSE: usize = 64 * 1024;

/// Сериализация запроса без клонирования batch'а.
#[derive(Serialize)]
struct LogRequestRef<'a> {
    entries: &'a [LogEntry],
}

// ════════════════════════════════════════════════════════════════
//  WireClient — блокирующий клиент протокола Log
// ════════════════════════════════════════════════════════════════

/// Одно исходящее соединение к peer-демону.
///
/// Кадр запроса: 4-байтовый BE префикс длины + JSON `{"entries":[...]}`.
/// Ответ в том же framing: `{"result":"ok"|"try_later"}`. Все операции
/// блокирующие с таймаутом `timeout` — вызывается только из воркеров
/// категорий.
pub struct WireClient {
    stream: TcpStream,
    peer: String,
}

impl WireClient {
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, StoreError> {
        let peer = format!("{host}:{port}");
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| StoreError::io(format!("resolve {peer}: {e}")))?
            .next()
            .ok_or_else(|| StoreError::io(format!("resolve {peer}: no addresses")))?;

        let stream = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|e| StoreError::io(format!("connect {peer}: {e}")))?;
        stream
            .set_read_timeout(Some(timeout))
            .map_err(|e| StoreError::io(format!("set timeout {peer}: {e}")))?;
        stream
            .set_write_timeout(Some(timeout))
            .map_err(|e| StoreError::io(format!("set timeout {peer}: {e}")))?;
        let _ = stream.set_nodelay(true);

        tracing::debug!(peer = %peer, "connected");
        Ok(Self { stream, peer })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Отправить batch одним удалённым вызовом `Log` и прочитать ответ.
    ///
    /// `Ok(TryLater)` — peer просит отступить; транспортные ошибки
    /// возвращаются как Err и означают, что соединение больше непригодно.
    pub fn send(&mut self, entries: &[LogEntry]) -> Result<LogResult, StoreError> {
        let payload = serde_json::to_vec(&LogRequestRef { entries })?;
        let mut frame = Vec::with_capacity(payload.len() + 4);
        encode_frame(&payload, &mut frame)?;

        self.stream
            .write_all(&frame)
            .map_err(|e| StoreError::io(format!("write to {}: {e}", self.peer)))?;

        let mut header = [0u8; 4];
        self.stream
            .read_exact(&mut header)
            .map_err(|e| StoreError::io(format!("read from {}: {e}", self.peer)))?;
        let len = u32::from_be_bytes(header) as usize;
        if len > MAX_RESPONSE {
            return Err(StoreError::protocol(format!(
                "response frame too large from {}: {len} bytes",
                self.peer
            )));
        }

        let mut body = vec![0u8; len];
        self.stream
            .read_exact(&mut body)
            .map_err(|e| StoreError::io(format!("read from {}: {e}", self.peer)))?;

        let resp: LogResponse = serde_json::from_slice(&body)?;
        Ok(resp.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barge_api::framing::decode_frame;
    use barge_api::LogRequest;
    use std::net::TcpListener;

    /// Мини-peer: принимает одно соединение, отвечает на каждый запрос
    /// заданным результатом, возвращает полученные записи.
    fn spawn_peer(replies: Vec<LogResult>) -> (u16, std::thread::JoinHandle<Vec<LogEntry>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut seen = Vec::new();
            let mut buf = Vec::new();
            let mut tmp = [0u8; 4096];
            for reply in replies {
                let (payload, used) = loop {
                    if let Some(frame) = decode_frame(&buf, 0).unwrap() {
                        break frame;
                    }
                    let n = sock.read(&mut tmp).unwrap();
                    assert!(n > 0, "peer: connection closed mid-frame");
                    buf.extend_from_slice(&tmp[..n]);
                };
                buf.drain(..used);

                let req: LogRequest = serde_json::from_slice(&payload).unwrap();
                seen.extend(req.entries);

                let body = serde_json::to_vec(&LogResponse { result: reply }).unwrap();
                let mut frame = Vec::new();
                encode_frame(&body, &mut frame).unwrap();
                sock.write_all(&frame).unwrap();
            }
            seen
        });
        (port, handle)
    }

    #[test]
    fn send_ok_and_try_later() {
        let (port, peer) = spawn_peer(vec![LogResult::Ok, LogResult::TryLater]);
        let mut client =
            WireClient::connect("127.0.0.1", port, Duration::from_secs(5)).unwrap();

        let batch = vec![LogEntry::new("foo", "a"), LogEntry::new("foo", "b")];
        assert_eq!(client.send(&batch).unwrap(), LogResult::Ok);
        assert_eq!(
            client.send(&[LogEntry::new("foo", "c")]).unwrap(),
            LogResult::TryLater
        );

        let seen = peer.join().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].message, "a");
        assert_eq!(seen[1].message, "b");
    }

    #[test]
    fn connect_refused_is_io_error() {
        // Порт только что освобождён — коннект должен падать.
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let err = WireClient::connect("127.0.0.1", port, Duration::from_millis(200))
            .err()
            .expect("connect must fail");
        assert_eq!(err.kind(), barge_api::ErrorKind::Io);
    }
}
