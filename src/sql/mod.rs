//! Append-only SQL text builder with a single-shot `coalesce`.
//!
//! The storage engine's JSON-dialect compiler is inherently dynamic (columns,
//! operators, and literal values all come from caller-supplied JSON), so it
//! builds SQL text directly rather than using `sqlx`'s compile-time `query!`
//! macro — this is that builder. Rust ownership replaces the historical
//! "caller owns the C-string, must free it" contract: `coalesce` just takes
//! the `String` out.

#[derive(Debug, Default)]
pub struct SqlBuffer(String);

impl SqlBuffer {
    pub fn new() -> Self {
        Self(String::new())
    }

    pub fn push_str(&mut self, s: &str) -> &mut Self {
        self.0.push_str(s);
        self
    }

    pub fn push_int(&mut self, v: i64) -> &mut Self {
        self.0.push_str(&v.to_string());
        self
    }

    pub fn push_float(&mut self, v: f64) -> &mut Self {
        self.0.push_str(&v.to_string());
        self
    }

    pub fn push_char(&mut self, c: char) -> &mut Self {
        self.0.push(c);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Takes the accumulated text, leaving the buffer empty.
    pub fn coalesce(&mut self) -> String {
        std::mem::take(&mut self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_left_to_right_and_coalesces_once() {
        let mut buf = SqlBuffer::new();
        buf.push_str("SELECT * FROM t WHERE id = ")
            .push_int(7)
            .push_char(' ')
            .push_str("AND v = ")
            .push_float(1.5);
        assert!(!buf.is_empty());
        let sql = buf.coalesce();
        assert_eq!(sql, "SELECT * FROM t WHERE id = 7 AND v = 1.5");
        assert!(buf.is_empty());
    }
}
