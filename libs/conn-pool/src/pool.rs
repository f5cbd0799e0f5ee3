use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use barge_api::{LogEntry, LogResult, StoreError};

use crate::client::WireClient;

// ════════════════════════════════════════════════════════════════
//  ConnectionPool — общий ресурс процесса
// ════════════════════════════════════════════════════════════════

struct PooledConn {
    host: String,
    port: u16,
    timeout: Duration,
    refcount: u32,
    client: Option<WireClient>,
}

/// Process-wide пул соединений к peer-демонам.
///
/// Сетевые store'ы, нацеленные на один peer, мультиплексируются через
/// одно соединение: ключ — строка `host:port` или `svc:{name}`. Store'ы
/// держат только ключи, владеет соединениями пул. Конструируется явно
/// на старте и раздаётся store'ам как `Arc` — никакого скрытого
/// синглтона.
///
/// Лок пула берётся только на время поиска записи; на время RPC
/// держится лок конкретного соединения (один незавершённый вызов на
/// соединение).
pub struct ConnectionPool {
    conns: Mutex<HashMap<String, Arc<Mutex<PooledConn>>>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self { conns: Mutex::new(HashMap::new()) }
    }

    /// Ключ пула для явного адреса.
    pub fn host_key(host: &str, port: u16) -> String {
        format!("{host}:{port}")
    }

    /// Ключ пула для service-based адресации.
    pub fn service_key(service: &str) -> String {
        format!("svc:{service}")
    }

    /// Открыть (или переиспользовать) соединение под ключом.
    ///
    /// Refcounted: каждый успешный open должен быть сбалансирован
    /// close'ом. Если запись есть, но соединение умерло — реконнект
    /// здесь же.
    pub fn open(
        &self,
        key: &str,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<(), StoreError> {
        let entry = {
            let mut map = self.conns.lock();
            map.entry(key.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(PooledConn {
                        host: host.to_string(),
                        port,
                        timeout,
                        refcount: 0,
                        client: None,
                    }))
                })
                .clone()
        };

        let mut conn = entry.lock();
        if conn.client.is_none() {
            match WireClient::connect(&conn.host, conn.port, conn.timeout) {
                Ok(client) => conn.client = Some(client),
                Err(e) => {
                    let unused = conn.refcount == 0;
                    drop(conn);
                    if unused {
                        self.conns.lock().remove(key);
                    }
                    return Err(e);
                }
            }
        }
        conn.refcount += 1;
        Ok(())
    }

    /// Вернуть соединение. Последний close закрывает сокет.
    pub fn close(&self, key: &str) {
        let mut map = self.conns.lock();
        if let Some(entry) = map.get(key) {
            let mut conn = entry.lock();
            conn.refcount = conn.refcount.saturating_sub(1);
            if conn.refcount == 0 {
                conn.client = None;
                drop(conn);
                map.remove(key);
                tracing::debug!(peer = %key, "pooled connection closed");
            }
        }
    }

    /// Отправить batch через соединение под ключом.
    ///
    /// Транспортная ошибка выбрасывает соединение из-под ключа; следующий
    /// open() переподключится.
    pub fn send(&self, key: &str, entries: &[LogEntry]) -> Result<LogResult, StoreError> {
        let entry = self
            .conns
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::closed(format!("peer '{key}' is not open")))?;

        let mut conn = entry.lock();
        let client = conn
            .client
            .as_mut()
            .ok_or_else(|| StoreError::closed(format!("peer '{key}' is disconnected")))?;

        match client.send(entries) {
            Ok(result) => Ok(result),
            Err(e) => {
                tracing::warn!(peer = %key, error = ?e, "connection dropped");
                conn.client = None;
                Err(e)
            }
        }
    }

    /// Открыто ли живое соединение под ключом.
    pub fn is_open(&self, key: &str) -> bool {
        self.conns
            .lock()
            .get(key)
            .map(|entry| entry.lock().client.is_some())
            .unwrap_or(false)
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barge_api::LogRequest;
    use barge_api::framing::{decode_frame, encode_frame};
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// Peer, отвечающий Ok на каждый запрос, пока соединение открыто.
    fn spawn_peer() -> (u16, std::thread::JoinHandle<usize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut total = 0usize;
            let mut buf = Vec::new();
            let mut tmp = [0u8; 4096];
            loop {
                while let Some((payload, used)) = decode_frame(&buf, 0).unwrap() {
                    buf.drain(..used);
                    let req: LogRequest = serde_json::from_slice(&payload).unwrap();
                    total += req.entries.len();
                    let body =
                        serde_json::to_vec(&barge_api::LogResponse { result: LogResult::Ok })
                            .unwrap();
                    let mut frame = Vec::new();
                    encode_frame(&body, &mut frame).unwrap();
                    sock.write_all(&frame).unwrap();
                }
                match sock.read(&mut tmp) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => buf.extend_from_slice(&tmp[..n]),
                }
            }
            total
        });
        (port, handle)
    }

    #[test]
    fn refcounted_sharing() {
        let (port, peer) = spawn_peer();
        let pool = ConnectionPool::new();
        let key = ConnectionPool::host_key("127.0.0.1", port);
        let timeout = Duration::from_secs(5);

        // Два store'а делят одно соединение.
        pool.open(&key, "127.0.0.1", port, timeout).unwrap();
        pool.open(&key, "127.0.0.1", port, timeout).unwrap();

        pool.send(&key, &[LogEntry::new("a", "1")]).unwrap();
        pool.close(&key);
        // Второй владелец всё ещё может слать.
        pool.send(&key, &[LogEntry::new("a", "2")]).unwrap();
        assert!(pool.is_open(&key));

        pool.close(&key);
        assert!(!pool.is_open(&key));
        let err = pool.send(&key, &[LogEntry::new("a", "3")]).unwrap_err();
        assert_eq!(err.kind(), barge_api::ErrorKind::Closed);

        assert_eq!(peer.join().unwrap(), 2);
    }

    #[test]
    fn send_without_open_is_closed() {
        let pool = ConnectionPool::new();
        let err = pool.send("nope:1", &[LogEntry::new("a", "m")]).unwrap_err();
        assert_eq!(err.kind(), barge_api::ErrorKind::Closed);
    }
}
