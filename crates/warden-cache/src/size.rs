use serde::Serialize;
use std::sync::Arc;

/// Estimativa usada quando não há forma melhor de medir um valor
pub const DEFAULT_SIZE_ESTIMATE: usize = 1024;

/// Estimativa aproximada do tamanho em memória de um valor de cache.
///
/// É uma heurística para o limite suave de memória, não contabilidade exata.
/// A implementação padrão devolve [`DEFAULT_SIZE_ESTIMATE`].
pub trait SizeEstimate {
    fn estimated_size(&self) -> usize {
        DEFAULT_SIZE_ESTIMATE
    }
}

/// Tamanho serializado em JSON, ou a estimativa padrão se a serialização falhar
pub fn estimate_serialized<T: Serialize + ?Sized>(value: &T) -> usize {
    serde_json::to_vec(value)
        .map(|bytes| bytes.len())
        .unwrap_or(DEFAULT_SIZE_ESTIMATE)
}

impl SizeEstimate for serde_json::Value {
    fn estimated_size(&self) -> usize {
        match self {
            serde_json::Value::String(s) => s.len(),
            other => estimate_serialized(other),
        }
    }
}

impl SizeEstimate for String {
    fn estimated_size(&self) -> usize {
        self.len()
    }
}

impl SizeEstimate for &'static str {
    fn estimated_size(&self) -> usize {
        self.len()
    }
}

impl SizeEstimate for Vec<u8> {
    fn estimated_size(&self) -> usize {
        self.len()
    }
}

impl<T: SizeEstimate + ?Sized> SizeEstimate for Arc<T> {
    fn estimated_size(&self) -> usize {
        (**self).estimated_size()
    }
}

macro_rules! default_size_estimate {
    ($($t:ty),*) => {
        $(impl SizeEstimate for $t {})*
    };
}

default_size_estimate!(bool, i32, i64, u32, u64, usize, f32, f64);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn strings_use_byte_length() {
        assert_eq!("olá".to_string().estimated_size(), 4);
        assert_eq!(json!("abc").estimated_size(), 3);
    }

    #[test]
    fn structured_values_use_serialized_length() {
        let value = json!({"a": 1});
        assert_eq!(value.estimated_size(), r#"{"a":1}"#.len());
    }

    #[test]
    fn unserializable_falls_back_to_default() {
        // chaves não-string não viram JSON
        let mut map = HashMap::new();
        map.insert(vec![1u8], 1);
        assert_eq!(estimate_serialized(&map), DEFAULT_SIZE_ESTIMATE);
        assert_eq!(42i64.estimated_size(), DEFAULT_SIZE_ESTIMATE);
    }
}
