//! codec - zstd-обёртка для хранимых артефактов и pollard-ов в транспорте.
//!
//! Один контекст сжатия и один контекст распаковки создаются при конструировании
//! и переиспользуются. Доступ через `&mut self`: экземпляр нельзя использовать
//! из нескольких потоков без внешней синхронизации.
//!
//! Детерминизм: для одинаковых входных байт и уровня результат encode одинаков
//! (однопоточный zstd, без словаря), на этом держится контракт checksum.

use anyhow::{anyhow, Context, Result};
use std::io::Read;

/// Upper bound for a single decoded artifact.
pub const MAX_DECODED_BYTES: u64 = 1 << 30;

pub struct Compressor {
    level: i32,
    encoder: zstd::bulk::Compressor<'static>,
    decoder: zstd::bulk::Decompressor<'static>,
}

impl Compressor {
    pub fn new(level: i32) -> Result<Self> {
        let range = zstd::compression_level_range();
        if !range.contains(&level) {
            return Err(anyhow!(
                "zstd level {} out of range [{}..={}]",
                level,
                range.start(),
                range.end()
            ));
        }
        let encoder = zstd::bulk::Compressor::new(level).context("create zstd compressor")?;
        let decoder = zstd::bulk::Decompressor::new().context("create zstd decompressor")?;
        Ok(Self {
            level,
            encoder,
            decoder,
        })
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    /// Compress into a single frame (content size is recorded in the frame header).
    pub fn encode(&mut self, bytes: &[u8]) -> Result<Vec<u8>> {
        self.encoder
            .compress(bytes)
            .context("zstd compress")
    }

    /// Decompress a frame produced by `encode` (or any single zstd frame).
    pub fn decode(&mut self, bytes: &[u8]) -> Result<Vec<u8>> {
        let declared = zstd::zstd_safe::get_frame_content_size(bytes)
            .map_err(|_| anyhow!("zstd frame header is invalid"))?;
        match declared {
            Some(size) => {
                if size > MAX_DECODED_BYTES {
                    return Err(anyhow!(
                        "zstd frame declares {} bytes (limit {})",
                        size,
                        MAX_DECODED_BYTES
                    ));
                }
                self.decoder
                    .decompress(bytes, size as usize)
                    .context("zstd decompress")
            }
            None => {
                // Кадр без content size (потоковый энкодер) - читаем стримом с лимитом
                let dec = zstd::stream::read::Decoder::new(bytes).context("zstd stream decoder")?;
                let mut out = Vec::new();
                dec.take(MAX_DECODED_BYTES + 1)
                    .read_to_end(&mut out)
                    .context("zstd stream decompress")?;
                if out.len() as u64 > MAX_DECODED_BYTES {
                    return Err(anyhow!("zstd stream exceeds {} bytes", MAX_DECODED_BYTES));
                }
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_is_deterministic_and_reversible() {
        let mut c = Compressor::new(19).unwrap();
        let data = b"{\"votingInfo\":[]}".repeat(200);
        let a = c.encode(&data).unwrap();
        let b = c.encode(&data).unwrap();
        assert_eq!(a, b);
        assert!(a.len() < data.len());
        assert_eq!(c.decode(&a).unwrap(), data);

        // другой экземпляр с тем же уровнем даёт те же байты
        let mut c2 = Compressor::new(19).unwrap();
        assert_eq!(c2.encode(&data).unwrap(), a);
    }

    #[test]
    fn decode_handles_streamed_frames() {
        let data = vec![7u8; 10_000];
        let mut enc = zstd::stream::write::Encoder::new(Vec::new(), 3).unwrap();
        std::io::Write::write_all(&mut enc, &data).unwrap();
        let framed = enc.finish().unwrap();
        let mut c = Compressor::new(3).unwrap();
        assert_eq!(c.decode(&framed).unwrap(), data);
    }

    #[test]
    fn decode_rejects_garbage() {
        let mut c = Compressor::new(3).unwrap();
        assert!(c.decode(b"definitely not zstd").is_err());
        assert!(c.decode(&[]).is_err());
    }

    #[test]
    fn level_out_of_range_is_rejected() {
        assert!(Compressor::new(1000).is_err());
    }
}
