use std::io::{self, Write};

/// Streaming SHA-256 used for target files and canonical metadata bytes.
#[derive(Clone, Copy)]
pub(crate) struct Hash {
    hash: hmac_sha256::Hash,
}

impl Hash {
    pub fn new() -> Self {
        Hash {
            hash: hmac_sha256::Hash::new(),
        }
    }

    pub fn update<T: AsRef<[u8]>>(&mut self, data: T) {
        self.hash.update(data);
    }

    pub fn finalize(&self) -> [u8; 32] {
        self.hash.finalize()
    }

    pub fn hex_digest(&self) -> String {
        hex::encode(self.finalize())
    }
}

impl Write for Hash {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hash.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Lowercase hex SHA-256 of `data`, the digest form carried in metadata.
pub(crate) fn sha256_hex(data: &[u8]) -> String {
    hex::encode(hmac_sha256::Hash::hash(data))
}
