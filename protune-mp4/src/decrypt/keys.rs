use crate::{Error, Result, scheme::EncryptionScheme};
use std::collections::{BTreeMap, HashMap};

/// Content keys addressable by sample description index and by key id.
#[derive(Clone, Debug, Default)]
pub struct KeyRing {
    by_index: BTreeMap<u32, [u8; 16]>,
    by_kid: HashMap<[u8; 16], [u8; 16]>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_index(&mut self, description_index: u32, key: [u8; 16]) {
        self.by_index.insert(description_index, key);
    }

    pub fn insert_kid(&mut self, kid: [u8; 16], key: [u8; 16]) {
        self.by_kid.insert(kid, key);
    }

    pub fn with_index(mut self, description_index: u32, key: [u8; 16]) -> Self {
        self.insert_index(description_index, key);
        self
    }

    pub fn with_kid(mut self, kid: [u8; 16], key: [u8; 16]) -> Self {
        self.insert_kid(kid, key);
        self
    }

    /// Add a key for a description index from its hex representation.
    pub fn index_hex(self, description_index: u32, key: &str) -> Result<Self> {
        Ok(self.with_index(description_index, parse_hex_16(key)?))
    }

    /// Add a KID/key pair from their hex representations.
    pub fn kid_hex(self, kid: &str, key: &str) -> Result<Self> {
        Ok(self.with_kid(parse_hex_16(kid)?, parse_hex_16(key)?))
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty() && self.by_kid.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_index.len() + self.by_kid.len()
    }

    /// Key for `description_index`, falling back to the scheme's default key id.
    pub fn lookup(
        &self,
        description_index: u32,
        scheme: Option<&EncryptionScheme>,
    ) -> Option<&[u8; 16]> {
        self.by_index.get(&description_index).or_else(|| {
            scheme.and_then(|x| self.by_kid.get(&x.default_key_id))
        })
    }
}

/// Parse a 32 character hex string into 16 bytes.
pub fn parse_hex_16(s: &str) -> Result<[u8; 16]> {
    let bytes = hex::decode(s.trim().replace('-', ""))?;
    bytes
        .try_into()
        .map_err(|x: Vec<u8>| Error::InvalidKeySize(x.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::SchemeType;

    #[test]
    fn index_wins_over_default_kid() {
        let scheme = EncryptionScheme::new(SchemeType::Cenc, 8, Vec::new(), [9; 16]).unwrap();
        let keys = KeyRing::new().with_kid([9; 16], [1; 16]);

        assert_eq!(keys.lookup(1, Some(&scheme)), Some(&[1; 16]));
        assert_eq!(keys.lookup(1, None), None);

        let keys = keys.with_index(1, [2; 16]);
        assert_eq!(keys.lookup(1, Some(&scheme)), Some(&[2; 16]));
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn hex_keys() {
        assert_eq!(
            parse_hex_16("eb676abb-cb34-5e96-bbcf-616630f1a3da").unwrap()[0],
            0xeb
        );
        assert!(matches!(parse_hex_16("abcd"), Err(Error::InvalidKeySize(2))));
        assert!(matches!(parse_hex_16("zz"), Err(Error::InvalidHex(_))));
    }
}
