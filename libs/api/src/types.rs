use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════
//  Log entries
// ════════════════════════════════════════════════════════════════

/// Одна запись лога: категория + произвольное сообщение.
///
/// Категория — клиентский тег, определяющий через какое дерево store'ов
/// пойдёт сообщение. Содержимое message для ядра непрозрачно.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub category: String,
    pub message: String,
}

impl LogEntry {
    pub fn new(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            message: message.into(),
        }
    }
}

/// Упорядоченная последовательность записей, обрабатываемая атомарно
/// на каждом узле. Порядок внутри batch'а сохраняется end-to-end
/// в пределах одной категории.
pub type Batch = Vec<LogEntry>;

// ════════════════════════════════════════════════════════════════
//  Wire protocol
// ════════════════════════════════════════════════════════════════

/// Запрос `Log` — то, что клиент шлёт в одном фрейме.
#[derive(Debug, Serialize, Deserialize)]
pub struct LogRequest {
    pub entries: Vec<LogEntry>,
}

/// Результат приёма batch'а.
///
/// `Ok` — каждая запись поставлена в очередь. `TryLater` — ни одна:
/// клиент должен повторить позже. Это единственный сигнал backpressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogResult {
    Ok,
    TryLater,
}

/// Ответ на запрос `Log`.
#[derive(Debug, Serialize, Deserialize)]
pub struct LogResponse {
    pub result: LogResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_result_wire_names() {
        assert_eq!(serde_json::to_string(&LogResult::Ok).unwrap(), "\"ok\"");
        assert_eq!(
            serde_json::to_string(&LogResult::TryLater).unwrap(),
            "\"try_later\""
        );
    }

    #[test]
    fn request_roundtrip() {
        let req = LogRequest {
            entries: vec![LogEntry::new("foo", "hello"), LogEntry::new("bar", "x:y")],
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: LogRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.entries, req.entries);
    }
}
