//! Stable fingerprints of serializable values (plans, ASTs).

use std::fmt;

use serde::Serialize;

use crate::error::Result;

/// 256-bit BLAKE3 digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Hash the canonical JSON encoding of `value`.
pub fn hash_serde<T: Serialize + ?Sized>(value: &T) -> Result<Hash256> {
    let bytes = serde_json::to_vec(value)?;
    Ok(Hash256(*blake3::hash(&bytes).as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{Op, Seq};

    #[test]
    fn equal_plans_hash_equal() {
        let a = Seq::new(vec![Op::Pass, Op::Head { count: 3 }]);
        let b = a.clone();
        assert_eq!(hash_serde(&a).unwrap(), hash_serde(&b).unwrap());
        let c = Seq::new(vec![Op::Pass, Op::Head { count: 4 }]);
        assert_ne!(hash_serde(&a).unwrap(), hash_serde(&c).unwrap());
        assert_eq!(hash_serde(&a).unwrap().to_hex().len(), 64);
    }
}
