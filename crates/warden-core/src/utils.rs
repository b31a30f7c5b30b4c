/*!
 * Warden Utils
 *
 * Utilitários comuns usados em toda a workspace Warden
 */

use serde::Serialize;
use tiny_keccak::{Hasher, Keccak};

/// Calcula o hash Keccak-256 de dados
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut result = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut result);
    result
}

/// Monta uma chave de cache endereçada por conteúdo: `<namespace>:<keccak hex>`.
///
/// Cada parte é prefixada pelo seu tamanho, então `["ab", "c"]` e `["a", "bc"]`
/// geram chaves diferentes.
pub fn cache_key<S: AsRef<[u8]>>(namespace: &str, parts: &[S]) -> String {
    let mut hasher = Keccak::v256();
    for part in parts {
        let bytes = part.as_ref();
        hasher.update(&(bytes.len() as u64).to_be_bytes());
        hasher.update(bytes);
    }
    let mut digest = [0u8; 32];
    hasher.finalize(&mut digest);
    format!("{}:{}", namespace, hex::encode(digest))
}

/// Chave de cache a partir de qualquer valor serializável.
///
/// Retorna `None` se o valor não puder ser serializado.
pub fn cache_key_for<T: Serialize + ?Sized>(namespace: &str, value: &T) -> Option<String> {
    let bytes = serde_json::to_vec(value).ok()?;
    Some(format!("{}:{}", namespace, hex::encode(keccak256(&bytes))))
}
