use serde::{Deserialize, Serialize};

use crate::util::coordinate_key;

// ════════════════════════════════════════════════════════════════
//  Overflow Policy
// ════════════════════════════════════════════════════════════════

/// Стратегия поведения при переполнении bounded канала подписчика.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// try_send(): если канал полон — дропнуть сообщение, залогировать.
    Drop,
    /// .send().await: ждать пока появится место (back-pressure).
    #[serde(alias = "backpressure")]
    BackPressure,
}

// ════════════════════════════════════════════════════════════════
//  PixelUpdate
// ════════════════════════════════════════════════════════════════

/// Событие изменения пикселя, как его прислал producer.
///
/// Координаты обязательны — они образуют ключ. Остальные поля
/// проходят через pipeline как opaque данные.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelUpdate {
    pub x: i64,
    pub y: i64,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default, rename = "userId")]
    pub user_id: Option<String>,
    /// Логическое время producer'а. Не монотонно между записями.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl PixelUpdate {
    pub fn coordinate(&self) -> String {
        coordinate_key(self.x, self.y)
    }
}

// ════════════════════════════════════════════════════════════════
//  StateRecord
// ════════════════════════════════════════════════════════════════

/// Сохраняемое состояние пикселя, ключ — `coordinate`.
///
/// `timestamp` и `last_updated` — метаданные; конфликт записей в один
/// ключ решается порядком прихода в store, а не этими полями.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRecord {
    pub coordinate: String,
    pub color: Option<String>,
    pub updated_by: Option<String>,
    pub timestamp: Option<i64>,
    /// Серверное время ingestion, Unix ms.
    pub last_updated: i64,
}

impl StateRecord {
    pub fn from_update(update: &PixelUpdate, last_updated: i64) -> Self {
        Self {
            coordinate: update.coordinate(),
            color: update.color.clone(),
            updated_by: update.user_id.clone(),
            timestamp: update.timestamp,
            last_updated,
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Queue message
// ════════════════════════════════════════════════════════════════

/// Непрозрачный токен подтверждения, выданный при получении сообщения.
/// Каждое новое получение выдаёт новый токен.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Сообщение, полученное из очереди.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Стабильный id сообщения (одинаковый при повторных доставках).
    pub message_id: String,
    /// Тело сообщения в том виде, в каком его отправил producer.
    pub body: Vec<u8>,
    pub receipt: ReceiptHandle,
    /// Сколько раз сообщение было выдано, включая текущую доставку.
    pub receive_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_record_serializes_camel_case() {
        let update = PixelUpdate {
            x: 3,
            y: 4,
            color: Some("#FF0000".into()),
            user_id: Some("u1".into()),
            timestamp: Some(1000),
        };
        let record = StateRecord::from_update(&update, 42);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "coordinate": "3:4",
                "color": "#FF0000",
                "updatedBy": "u1",
                "timestamp": 1000,
                "lastUpdated": 42,
            })
        );
    }

    #[test]
    fn overflow_accepts_alias() {
        let p: OverflowPolicy = serde_json::from_str("\"backpressure\"").unwrap();
        assert_eq!(p, OverflowPolicy::BackPressure);
    }
}
