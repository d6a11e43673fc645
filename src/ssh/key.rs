// 私钥加载
//
// 私钥只用于出站认证，不写日志、不对外暴露

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::keys::PrivateKey;
use tracing::debug;

use super::error::CredentialError;

/// 已加载的私钥凭据
#[derive(Clone)]
pub struct Credential {
    key: Arc<PrivateKey>,
    path: PathBuf,
}

impl Credential {
    /// 私钥（只读共享）
    pub fn key(&self) -> Arc<PrivateKey> {
        self.key.clone()
    }

    /// 私钥算法名，例如 ssh-ed25519
    pub fn algorithm(&self) -> String {
        self.key.algorithm().to_string()
    }
}

// 不输出密钥内容
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("path", &self.path)
            .field("algorithm", &self.algorithm())
            .finish_non_exhaustive()
    }
}

/// 加载私钥文件
pub async fn load_credential(
    key_path: &Path,
    passphrase: Option<&str>,
) -> Result<Credential, CredentialError> {
    debug!("[Key] Loading private key from {:?}", key_path);

    let key_data = tokio::fs::read(key_path)
        .await
        .map_err(|source| CredentialError::Read {
            path: key_path.to_path_buf(),
            source,
        })?;

    let key = decode_credential(key_path, &key_data, passphrase)?;

    debug!("[Key] Private key loaded ({})", key.algorithm());
    Ok(key)
}

/// 解析私钥内容（OpenSSH / PEM 格式）
pub fn decode_credential(
    key_path: &Path,
    key_data: &[u8],
    passphrase: Option<&str>,
) -> Result<Credential, CredentialError> {
    let text = std::str::from_utf8(key_data).map_err(|_| CredentialError::Decode {
        path: key_path.to_path_buf(),
        reason: "key file is not valid UTF-8 text".to_string(),
    })?;

    let key = russh::keys::decode_secret_key(text, passphrase).map_err(|e| {
        CredentialError::Decode {
            path: key_path.to_path_buf(),
            reason: e.to_string(),
        }
    })?;

    Ok(Credential {
        key: Arc::new(key),
        path: key_path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = include_str!("../../tests/fixtures/id_ed25519");

    #[tokio::test]
    async fn test_load_credential_missing_file() {
        let err = load_credential(Path::new("/nonexistent/trustboot/id_ecdsa"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::Read { .. }));
    }

    #[test]
    fn test_decode_credential_rejects_garbage() {
        let err = decode_credential(Path::new("id_bad"), b"not a private key", None).unwrap_err();
        assert!(matches!(err, CredentialError::Decode { .. }));
    }

    #[test]
    fn test_decode_credential_openssh_ed25519() {
        let credential =
            decode_credential(Path::new("id_ed25519"), TEST_KEY.as_bytes(), None).unwrap();
        assert_eq!(credential.algorithm(), "ssh-ed25519");
    }

    #[test]
    fn test_debug_does_not_print_key_material() {
        let credential =
            decode_credential(Path::new("id_ed25519"), TEST_KEY.as_bytes(), None).unwrap();
        let rendered = format!("{:?}", credential);
        assert!(rendered.contains("id_ed25519"));
        assert!(!rendered.contains("OPENSSH"));
        assert!(!rendered.contains("AAAA"));
    }
}
