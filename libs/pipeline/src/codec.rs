//! Event codec: тело сообщения очереди → `PixelUpdate`.

use pixel_api::PixelUpdate;

use crate::error::DecodeError;

/// Распарсить тело сообщения. Чистая функция.
///
/// Требуется JSON-объект с целыми `x` и `y`; `color`, `userId`,
/// `timestamp` необязательны, лишние поля игнорируются.
pub fn decode(raw: &[u8]) -> Result<PixelUpdate, DecodeError> {
    let first = raw.iter().find(|b| !b.is_ascii_whitespace());
    match first {
        None => Err(DecodeError::Empty),
        // serde принимает struct и из массива — отсекаем явно.
        Some(b'{') => Ok(serde_json::from_slice(raw)?),
        Some(_) => {
            // Не-объект, но валидный JSON (число, строка, массив)
            // отличаем от мусора только ради текста ошибки.
            match serde_json::from_slice::<serde_json::Value>(raw) {
                Ok(_) => Err(DecodeError::NotAnObject),
                Err(e) => Err(DecodeError::Malformed(e)),
            }
        }
    }
}
