/// Caller-owned growable byte buffer used by `raw_object`/`string` as the
/// destination for unescaped output.
///
/// The caller owns it, clears it before each use, and the scanner never
/// retains a reference across calls — unlike a shared scratch buffer, there's
/// no risk of one call's output being overwritten by the next.
#[derive(Debug, Default, Clone)]
pub struct GrowableBuffer(Vec<u8>);

impl GrowableBuffer {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn push(&mut self, byte: u8) {
        self.0.push(byte);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or_default()
    }

    pub fn into_string(self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}
