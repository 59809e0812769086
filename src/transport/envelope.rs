//! 站点间传输的二进制信封
//!
//! `WPSYNCHROTRANSFER` + 版本 + 标志位 + 正文。正文为 JSON 载荷加若干命名附件，
//! 可选 deflate 压缩，再可选用访问密钥做 AES-256-GCM 加密。

use crate::utils::crypto;
use crate::utils::error::{AppError, Result};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::io::{Read, Write};

pub const MAGIC: &[u8] = b"WPSYNCHROTRANSFER";
pub const VERSION: u8 = 1;

const FLAG_DEFLATE: u8 = 0b01;
const FLAG_ENCRYPTED: u8 = 0b10;
const HEADER_LEN: usize = MAGIC.len() + 2;

/// 未指定上限时正文解压后的最大长度
pub const MAX_INFLATED_BYTES: u64 = 256 * 1024 * 1024;

/// 命名的二进制附件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub payload: Value,
    pub attachments: Vec<Attachment>,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            payload: Value::Object(Default::default()),
            attachments: Vec::new(),
        }
    }
}

/// 魔数位置，之前的内容是响应里混入的杂项输出
pub fn find_magic(data: &[u8]) -> Option<usize> {
    data.windows(MAGIC.len()).position(|w| w == MAGIC)
}

impl Envelope {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            attachments: Vec::new(),
        }
    }

    pub fn from_payload<T: Serialize>(payload: &T) -> Result<Self> {
        Ok(Self::new(serde_json::to_value(payload)?))
    }

    pub fn with_attachment(mut self, name: impl Into<String>, data: Vec<u8>) -> Self {
        self.attachments.push(Attachment {
            name: name.into(),
            data,
        });
        self
    }

    pub fn attachment(&self, name: &str) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.name == name)
    }

    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// 编码；给出 access_key 时加密
    pub fn encode(&self, access_key: Option<&str>, deflate: bool) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(&self.payload)?;
        let json_len = u32::try_from(json.len())
            .map_err(|_| AppError::Transport("Payload too large for envelope".to_string()))?;

        let mut body = Vec::with_capacity(json.len() + 4);
        body.extend_from_slice(&json_len.to_be_bytes());
        body.extend_from_slice(&json);
        for attachment in &self.attachments {
            let name_len = u16::try_from(attachment.name.len()).map_err(|_| {
                AppError::Transport(format!("Attachment name too long: {}", attachment.name))
            })?;
            body.extend_from_slice(&name_len.to_be_bytes());
            body.extend_from_slice(attachment.name.as_bytes());
            body.extend_from_slice(&(attachment.data.len() as u64).to_be_bytes());
            body.extend_from_slice(&attachment.data);
        }

        let mut flags = 0u8;
        if deflate {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&body)?;
            body = encoder.finish()?;
            flags |= FLAG_DEFLATE;
        }
        if let Some(key) = access_key {
            body = crypto::encrypt_bytes(key, &body)?;
            flags |= FLAG_ENCRYPTED;
        }

        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        out.push(flags);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// 解码，自动跳过魔数之前的内容
    pub fn decode(data: &[u8], access_key: Option<&str>) -> Result<Self> {
        Self::decode_with_limit(data, access_key, MAX_INFLATED_BYTES)
    }

    /// 同 `decode`，正文解压后超过 `max_body_bytes` 即报错
    pub fn decode_with_limit(data: &[u8], access_key: Option<&str>, max_body_bytes: u64) -> Result<Self> {
        let start = find_magic(data)
            .ok_or_else(|| AppError::Transport("Envelope marker not found".to_string()))?;
        let data = &data[start..];
        if data.len() < HEADER_LEN {
            return Err(AppError::Transport("Envelope header truncated".to_string()));
        }

        let version = data[MAGIC.len()];
        if version != VERSION {
            return Err(AppError::Transport(format!(
                "Unsupported envelope version {}",
                version
            )));
        }
        let flags = data[MAGIC.len() + 1];
        let mut body = data[HEADER_LEN..].to_vec();

        if flags & FLAG_ENCRYPTED != 0 {
            let key = access_key.ok_or_else(|| {
                AppError::Encryption("Envelope is encrypted but no access key is available".to_string())
            })?;
            body = crypto::decrypt_bytes(key, &body)?;
        }
        if flags & FLAG_DEFLATE != 0 {
            let mut inflated = Vec::new();
            DeflateDecoder::new(body.as_slice())
                .take(max_body_bytes.saturating_add(1))
                .read_to_end(&mut inflated)
                .map_err(|e| AppError::Transport(format!("Failed to inflate envelope: {}", e)))?;
            if inflated.len() as u64 > max_body_bytes {
                return Err(AppError::InvalidInput(format!(
                    "Envelope body exceeds {} bytes after inflating",
                    max_body_bytes
                )));
            }
            body = inflated;
        }

        let mut reader = BodyReader { data: &body, pos: 0 };
        let json_len = u32::from_be_bytes(reader.array()?) as usize;
        let payload: Value = serde_json::from_slice(reader.take(json_len)?)?;

        let mut attachments = Vec::new();
        while !reader.is_empty() {
            let name_len = u16::from_be_bytes(reader.array()?) as usize;
            let name = String::from_utf8(reader.take(name_len)?.to_vec())
                .map_err(|_| AppError::Transport("Attachment name is not UTF-8".to_string()))?;
            let data_len = usize::try_from(u64::from_be_bytes(reader.array()?))
                .map_err(|_| AppError::Transport("Attachment too large".to_string()))?;
            let data = reader.take(data_len)?.to_vec();
            attachments.push(Attachment { name, data });
        }

        Ok(Self {
            payload,
            attachments,
        })
    }
}

struct BodyReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| AppError::Transport("Envelope body truncated".to_string()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }
}
