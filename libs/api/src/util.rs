/// Текущее Unix-время в миллисекундах.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Ключ пикселя в state store: `"<x>:<y>"`.
pub fn coordinate_key(x: i64, y: i64) -> String {
    format!("{x}:{y}")
}
