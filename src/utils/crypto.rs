use crate::utils::error::{AppError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::Rng;
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 12;

/// 由站点访问密钥派生 AES-256 密钥
fn derive_key(access_key: &str) -> [u8; 32] {
    let digest = Sha256::digest(access_key.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

/// 加密字节流，输出 nonce + ciphertext
pub fn encrypt_bytes(access_key: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
    let key = derive_key(access_key);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| AppError::Encryption(format!("Failed to create cipher: {}", e)))?;

    let mut rng = rand::thread_rng();
    let nonce_bytes: [u8; NONCE_LEN] = rng.r#gen();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| AppError::Encryption(format!("Encryption failed: {}", e)))?;

    let mut result = nonce_bytes.to_vec();
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// 解密 `encrypt_bytes` 的输出
pub fn decrypt_bytes(access_key: &str, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < NONCE_LEN {
        return Err(AppError::Encryption(
            "Invalid encrypted data: too short".to_string(),
        ));
    }

    let key = derive_key(access_key);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| AppError::Encryption(format!("Failed to create cipher: {}", e)))?;

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| AppError::Encryption(format!("Decryption failed: {}", e)))
}

/// 生成新的站点访问密钥 (16 字节随机数的十六进制)
pub fn generate_access_key() -> String {
    let bytes: [u8; 16] = rand::thread_rng().r#gen();
    hex::encode(bytes)
}

/// 生成传输令牌原文
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().r#gen();
    hex::encode(bytes)
}

/// 调用方出示的令牌: sha256(token + access_key)
pub fn token_hash(token: &str, access_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.update(access_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// 固定耗时比较
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let original = b"masterdata payload";
        let encrypted = encrypt_bytes("site-key", original).unwrap();
        assert_ne!(&encrypted[NONCE_LEN..], original);

        let decrypted = decrypt_bytes("site-key", &encrypted).unwrap();
        assert_eq!(decrypted, original);
    }

    #[test]
    fn test_decrypt_with_wrong_key() {
        let encrypted = encrypt_bytes("site-key", b"secret").unwrap();
        assert!(decrypt_bytes("other-key", &encrypted).is_err());
    }

    #[test]
    fn test_decrypt_invalid_data() {
        assert!(decrypt_bytes("site-key", b"short").is_err());
    }

    #[test]
    fn test_token_hash_depends_on_key() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert_ne!(token_hash(&token, "a"), token_hash(&token, "b"));
        assert!(constant_time_eq(&token_hash(&token, "a"), &token_hash(&token, "a")));
    }

    #[test]
    fn test_generate_access_key() {
        let key = generate_access_key();
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
