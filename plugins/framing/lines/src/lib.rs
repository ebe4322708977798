use pixel_api::BackendError;

/// Newline-delimited framing. Stateless: буфер хранит вызывающий,
/// поэтому один экземпляр обслуживает все соединения.
#[derive(Debug, Clone, Copy)]
pub struct LinesFraming {
    max_length: usize,
}

impl LinesFraming {
    /// `max_length` — максимальная длина строки в байтах (0 = без ограничения).
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    /// Извлечь одну строку из буфера.
    /// Возвращает (line, bytes_consumed) или None если строка неполная.
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>, BackendError> {
        // Ищем первый \n в буфере
        let pos = match buf.iter().position(|&b| b == b'\n') {
            Some(p) => p,
            None => {
                // Нет полной строки — проверяем max_length
                if self.max_length > 0 && buf.len() > self.max_length {
                    return Err(BackendError::format_err(format!(
                        "line too long: {} bytes (max {}) and no newline found",
                        buf.len(),
                        self.max_length
                    )));
                }
                return Ok(None);
            }
        };

        let consumed = pos + 1; // включая \n

        // Содержимое строки без \n, обрезаем \r
        let line = &buf[..pos];
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        if self.max_length > 0 && line.len() > self.max_length {
            return Err(BackendError::format_err(format!(
                "line too long: {} bytes (max {})",
                line.len(),
                self.max_length
            )));
        }

        Ok(Some((line.to_vec(), consumed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_lines_and_strips_cr() {
        let framing = LinesFraming::new(0);
        let buf = b"{\"x\":1}\r\n{\"x\":2}\npartial";

        let (first, used) = framing.decode(buf).unwrap().unwrap();
        assert_eq!(first, b"{\"x\":1}".to_vec());
        let (second, used2) = framing.decode(&buf[used..]).unwrap().unwrap();
        assert_eq!(second, b"{\"x\":2}".to_vec());
        assert!(framing.decode(&buf[used + used2..]).unwrap().is_none());
    }

    #[test]
    fn rejects_oversized_lines() {
        let framing = LinesFraming::new(4);
        assert!(framing.decode(b"12345\n").is_err());
        assert!(framing.decode(b"123456").is_err());
        assert!(framing.decode(b"1234\n").unwrap().is_some());
    }
}
