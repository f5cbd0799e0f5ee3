use crate::error::StoreError;

// ════════════════════════════════════════════════════════════════
//  Length-prefixed framing — wire protocol и framed-файлы
// ════════════════════════════════════════════════════════════════
//
// Один формат кадра для всего: 4-байтовый big-endian префикс длины,
// затем payload. Его используют и TCP-протокол `Log`, и framed-файловый
// store на диске.

/// Размер префикса длины в байтах.
pub const LENGTH_PREFIX: usize = 4;

/// Добавить framed payload в выходной буфер.
pub fn encode_frame(payload: &[u8], buf: &mut Vec<u8>) -> Result<(), StoreError> {
    if payload.len() > u32::MAX as usize {
        return Err(StoreError::protocol(format!(
            "payload too large for 4-byte header: {}",
            payload.len()
        )));
    }
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(())
}

/// Извлечь один фрейм из буфера.
///
/// Возвращает `(payload, bytes_consumed)` или None если фрейм неполный.
/// `max_payload` = 0 — без ограничения.
pub fn decode_frame(
    buf: &[u8],
    max_payload: usize,
) -> Result<Option<(Vec<u8>, usize)>, StoreError> {
    if buf.len() < LENGTH_PREFIX {
        return Ok(None);
    }

    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if max_payload > 0 && len > max_payload {
        return Err(StoreError::protocol(format!(
            "frame payload too large: {len} bytes (max {max_payload})"
        )));
    }

    let total = LENGTH_PREFIX + len;
    if buf.len() < total {
        return Ok(None); // не хватает данных для полного фрейма
    }

    Ok(Some((buf[LENGTH_PREFIX..total].to_vec(), total)))
}
