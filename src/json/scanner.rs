//! LazyJSON: a zero-copy, depth-tracking walker over a caller-owned byte
//! slice. Used by the OMF emitter and by filter plugins to inspect hint
//! payloads without building a full parsed tree.
//!
//! The frame stack is owned by the caller: `enter_object`/`enter_array` push,
//! `pop` pops explicitly. The scanner never mutates the underlying buffer and
//! never allocates except in `string`/`raw_object`.

use super::buffer::GrowableBuffer;
use super::JsonError;

/// An offset into the scanned document. Cheap, `Copy`, and meaningless
/// outside the `LazyJson` that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor(pub usize);

#[derive(Debug, Clone, Copy)]
struct Frame {
    in_object: bool,
    in_array: bool,
    start: usize,
    end: usize,
}

pub struct LazyJson<'a> {
    doc: &'a [u8],
    frames: Vec<Frame>,
}

impl<'a> LazyJson<'a> {
    pub fn new(doc: &'a [u8]) -> Self {
        Self {
            doc,
            frames: Vec::new(),
        }
    }

    /// Cursor to the first non-whitespace byte of the document.
    pub fn root(&self) -> Cursor {
        Cursor(skip_ws(self.doc, 0))
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Discards the top frame. Caller's responsibility to call this once
    /// done with a nested container.
    pub fn pop(&mut self) {
        self.frames.pop();
    }

    fn current_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Locates the matching close of the object/array starting at `cursor`.
    fn object_end(&self, cursor: Cursor) -> Option<Cursor> {
        let open = *self.doc.get(cursor.0)?;
        let close = match open {
            b'{' => b'}',
            b'[' => b']',
            _ => return None,
        };
        let mut depth = 0i32;
        let mut quoted = false;
        let mut escaped = false;
        let mut i = cursor.0;
        while i < self.doc.len() {
            let b = self.doc[i];
            if quoted {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    quoted = false;
                }
            } else if b == b'"' {
                quoted = true;
            } else if b == open {
                depth += 1;
            } else if b == close {
                depth -= 1;
                if depth == 0 {
                    return Some(Cursor(i));
                }
            }
            i += 1;
        }
        None
    }

    /// Pushes an object frame at `cursor` (which must point at `{`) and
    /// returns a cursor to the first key, or the closing `}`. If the
    /// document has no matching close, the frame's end is clamped to the
    /// document end so callers like `array_size` still detect the
    /// truncation instead of it surfacing as a silent `None` here.
    pub fn enter_object(&mut self, cursor: Cursor) -> Option<Cursor> {
        if self.doc.get(cursor.0) != Some(&b'{') {
            return None;
        }
        let end = self.object_end(cursor).map_or(self.doc.len(), |c| c.0);
        self.frames.push(Frame {
            in_object: true,
            in_array: false,
            start: cursor.0,
            end,
        });
        Some(Cursor(skip_ws(self.doc, cursor.0 + 1)))
    }

    /// Pushes an array frame at `cursor` (which must point at `[`) and
    /// returns a cursor to the first element, or the closing `]`. Same
    /// best-effort clamping as `enter_object` for unterminated input.
    pub fn enter_array(&mut self, cursor: Cursor) -> Option<Cursor> {
        if self.doc.get(cursor.0) != Some(&b'[') {
            return None;
        }
        let end = self.object_end(cursor).map_or(self.doc.len(), |c| c.0);
        self.frames.push(Frame {
            in_object: false,
            in_array: true,
            start: cursor.0,
            end,
        });
        Some(Cursor(skip_ws(self.doc, cursor.0 + 1)))
    }

    fn scan_string_end(&self, pos: usize) -> Option<usize> {
        let mut i = pos + 1;
        let mut escaped = false;
        while i < self.doc.len() {
            let b = self.doc[i];
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                return Some(i + 1);
            }
            i += 1;
        }
        None
    }

    /// Returns the index right after the value starting at `pos` ends
    /// (before the next structural delimiter), respecting string/escape
    /// state and nested containers.
    fn scan_value_end(&self, pos: usize) -> Option<usize> {
        match *self.doc.get(pos)? {
            b'"' => self.scan_string_end(pos),
            b'{' | b'[' => self.object_end(Cursor(pos)).map(|c| c.0 + 1),
            _ => {
                let mut i = pos;
                while i < self.doc.len() && !matches!(self.doc[i], b',' | b'}' | b']') {
                    i += 1;
                }
                Some(i)
            }
        }
    }

    /// Finds the value cursor for `name` within the current object frame.
    /// Matching is by exact quoted-key comparison — the comparison uses the
    /// full `"name"` length (fixing the historical two-character
    /// under-compare: the original only compared the unquoted key length,
    /// so e.g. key `"foobar"` could match a search for `"foo"`).
    pub fn attribute(&self, name: &str) -> Option<Cursor> {
        let frame = self.current_frame()?;
        if !frame.in_object {
            return None;
        }
        let end = frame.end;
        let quoted = format!("\"{name}\"");
        let mut i = frame.start + 1;
        while i < end {
            i = skip_ws(self.doc, i);
            if i >= end || self.doc[i] == b'}' {
                break;
            }
            if self.doc[i] != b'"' {
                break;
            }
            let key_start = i;
            let key_end = self.scan_string_end(i)?;
            let is_match =
                key_end - key_start == quoted.len() && &self.doc[key_start..key_end] == quoted.as_bytes();
            i = skip_ws(self.doc, key_end);
            if i >= end || self.doc[i] != b':' {
                return None;
            }
            i = skip_ws(self.doc, i + 1);
            let value_start = i;
            if is_match {
                return Some(Cursor(value_start));
            }
            i = self.scan_value_end(value_start)?;
            i = skip_ws(self.doc, i);
            if i < end && self.doc[i] == b',' {
                i += 1;
            }
        }
        None
    }

    fn matches_ci(&self, cursor: Cursor, lit: &[u8]) -> bool {
        self.doc
            .get(cursor.0..cursor.0 + lit.len())
            .is_some_and(|s| s.eq_ignore_ascii_case(lit))
    }

    pub fn is_null(&self, cursor: Cursor) -> bool {
        self.matches_ci(cursor, b"null")
    }

    pub fn is_true(&self, cursor: Cursor) -> bool {
        self.matches_ci(cursor, b"true")
    }

    pub fn is_false(&self, cursor: Cursor) -> bool {
        self.matches_ci(cursor, b"false")
    }

    pub fn is_bool(&self, cursor: Cursor) -> bool {
        self.is_true(cursor) || self.is_false(cursor)
    }

    /// Advances within the current array frame to the next element; `None`
    /// at `]`. A trailing comma is logged as a scan error and also yields
    /// `None`.
    pub fn next_array_element(&self, cursor: Cursor) -> Option<Cursor> {
        let frame = self.current_frame()?;
        if !frame.in_array {
            return None;
        }
        let end = frame.end;
        let mut i = self.scan_value_end(cursor.0)?;
        i = skip_ws(self.doc, i);
        if i >= end {
            return None;
        }
        match self.doc[i] {
            b']' => None,
            b',' => {
                i = skip_ws(self.doc, i + 1);
                if i >= end || self.doc[i] == b']' {
                    tracing::error!("trailing comma in JSON array");
                    return None;
                }
                Some(Cursor(i))
            }
            _ => None,
        }
    }

    /// Counts remaining elements in the current array frame from `cursor`
    /// without consuming scanner state. An unterminated array is an error.
    pub fn array_size(&self, cursor: Cursor) -> Result<i64, JsonError> {
        let frame = self
            .current_frame()
            .ok_or_else(|| JsonError::Scan("array_size outside any frame".into()))?;
        if !frame.in_array {
            return Err(JsonError::Scan("array_size called outside array frame".into()));
        }
        let end = frame.end;
        let mut i = skip_ws(self.doc, cursor.0);
        if i >= end {
            return Err(JsonError::Scan("unterminated array".into()));
        }
        if self.doc[i] == b']' {
            return Ok(0);
        }
        let mut count = 0i64;
        loop {
            let value_end = self
                .scan_value_end(i)
                .ok_or_else(|| JsonError::Scan("unterminated array".into()))?;
            count += 1;
            i = skip_ws(self.doc, value_end);
            if i >= end {
                return Err(JsonError::Scan("unterminated array".into()));
            }
            match self.doc[i] {
                b']' => return Ok(count),
                b',' => i = skip_ws(self.doc, i + 1),
                _ => return Err(JsonError::Scan("malformed array element separator".into())),
            }
        }
    }

    /// Decimal integer parse with optional leading `-`.
    pub fn int_value(&self, cursor: Cursor) -> Option<i64> {
        let mut i = cursor.0;
        let neg = self.doc.get(i) == Some(&b'-');
        if neg {
            i += 1;
        }
        let start = i;
        while self.doc.get(i).is_some_and(u8::is_ascii_digit) {
            i += 1;
        }
        if i == start {
            return None;
        }
        std::str::from_utf8(&self.doc[cursor.0..i]).ok()?.parse().ok()
    }

    /// Copies a JSON string value out with unescaping, allocating a new
    /// owned `String`.
    pub fn string(&self, cursor: Cursor) -> Option<String> {
        let mut buf = GrowableBuffer::new();
        self.string_into(cursor, &mut buf)?;
        Some(buf.into_string())
    }

    /// Writes a JSON string value, unescaped, into a caller-provided buffer.
    pub fn string_into(&self, cursor: Cursor, buf: &mut GrowableBuffer) -> Option<()> {
        buf.clear();
        if self.doc.get(cursor.0) != Some(&b'"') {
            return None;
        }
        let mut i = cursor.0 + 1;
        loop {
            let b = *self.doc.get(i)?;
            match b {
                b'"' => return Some(()),
                b'\\' => {
                    i += 1;
                    let esc = *self.doc.get(i)?;
                    match esc {
                        b'n' => buf.push(b'\n'),
                        b't' => buf.push(b'\t'),
                        b'r' => buf.push(b'\r'),
                        b'b' => buf.push(0x08),
                        b'f' => buf.push(0x0c),
                        b'u' => {
                            let hex = self.doc.get(i + 1..i + 5)?;
                            let cp = u32::from_str_radix(std::str::from_utf8(hex).ok()?, 16).ok()?;
                            if let Some(c) = char::from_u32(cp) {
                                let mut tmp = [0u8; 4];
                                for byte in c.encode_utf8(&mut tmp).as_bytes() {
                                    buf.push(*byte);
                                }
                            }
                            i += 4;
                        }
                        other => buf.push(other),
                    }
                    i += 1;
                }
                other => {
                    buf.push(other);
                    i += 1;
                }
            }
        }
    }

    /// Materialises the raw bytes of the object/array at `cursor` into
    /// `buf`, unescaping `\x` -> `x`; if `escape_char` is given, a `\` is
    /// inserted before every occurrence of that byte in the output. `buf` is
    /// cleared first — it is the caller-owned replacement for the historical
    /// "do not free, will be overwritten" pointer.
    pub fn raw_object(&self, cursor: Cursor, escape_char: Option<u8>, buf: &mut GrowableBuffer) -> Option<()> {
        buf.clear();
        let end = self.object_end(cursor)?;
        let mut i = cursor.0;
        while i <= end.0 {
            let mut b = self.doc[i];
            if b == b'\\' && i + 1 <= end.0 {
                i += 1;
                b = self.doc[i];
            }
            if escape_char == Some(b) {
                buf.push(b'\\');
            }
            buf.push(b);
            i += 1;
        }
        Some(())
    }
}

fn skip_ws(doc: &[u8], mut i: usize) -> usize {
    while doc.get(i).is_some_and(u8::is_ascii_whitespace) {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_finds_sibling_key() {
        let doc = br#"{"a": 1, "foo": {"x":1}, "foobar": "should not match foo"}"#;
        let mut s = LazyJson::new(doc);
        let root = s.root();
        s.enter_object(root).unwrap();
        let foo = s.attribute("foo").unwrap();
        assert_eq!(doc[foo.0], b'{');
        // the under-compare bug would have matched "foobar" when searching "foo"
        let mut inner = LazyJson::new(doc);
        inner.enter_object(root).unwrap();
        assert!(inner.attribute("fo").is_none());
    }

    #[test]
    fn attribute_respects_escaped_quotes_in_values() {
        let doc = br#"{"skip": "a \" quote", "target": 42}"#;
        let mut s = LazyJson::new(doc);
        s.enter_object(Cursor(0)).unwrap();
        let target = s.attribute("target").unwrap();
        assert_eq!(s.int_value(target), Some(42));
    }

    #[test]
    fn array_iteration_and_size() {
        let doc = br#"[1, 2, 3]"#;
        let mut s = LazyJson::new(doc);
        let first = s.enter_array(Cursor(0)).unwrap();
        assert_eq!(s.array_size(first).unwrap(), 3);
        let mut cur = first;
        let mut values = vec![];
        loop {
            values.push(s.int_value(cur).unwrap());
            match s.next_array_element(cur) {
                Some(next) => cur = next,
                None => break,
            }
        }
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn unterminated_array_is_error() {
        let doc = br#"[1, 2"#;
        let mut s = LazyJson::new(doc);
        let first = s.enter_array(Cursor(0)).unwrap();
        assert!(s.array_size(first).is_err());
    }

    #[test]
    fn string_unescapes() {
        let doc = br#""line1\nline2\tA""#;
        let s = LazyJson::new(doc);
        assert_eq!(s.string(Cursor(0)).unwrap(), "line1\nline2\tA");
    }

    #[test]
    fn raw_object_round_trips_and_escapes_char() {
        let doc = br#"{"a":1,"b":"x"}"#;
        let mut s = LazyJson::new(doc);
        s.enter_object(Cursor(0)).unwrap();
        let mut buf = GrowableBuffer::new();
        s.raw_object(Cursor(0), Some(b'"'), &mut buf).unwrap();
        assert!(buf.as_str().contains("\\\""));
    }

    #[test]
    fn bool_and_null_prefixes_are_case_insensitive() {
        let doc = b"TRUE false NULL";
        let s = LazyJson::new(doc);
        assert!(s.is_true(Cursor(0)));
        assert!(s.is_false(Cursor(5)));
        assert!(s.is_null(Cursor(11)));
    }

    proptest::proptest! {
        /// Scanning an array of arbitrary `i64`s back out must reproduce the
        /// exact sequence that was written in, in order.
        #[test]
        fn array_scan_round_trips_arbitrary_ints(values in proptest::collection::vec(proptest::num::i64::ANY, 0..16)) {
            let doc = format!(
                "[{}]",
                values.iter().map(i64::to_string).collect::<Vec<_>>().join(",")
            )
            .into_bytes();
            let mut s = LazyJson::new(&doc);
            let first = s.enter_array(Cursor(0)).unwrap();
            prop_assert_eq!(s.array_size(first).unwrap(), values.len() as i64);

            let mut read_back = vec![];
            if !values.is_empty() {
                let mut cur = first;
                loop {
                    read_back.push(s.int_value(cur).unwrap());
                    match s.next_array_element(cur) {
                        Some(next) => cur = next,
                        None => break,
                    }
                }
            }
            prop_assert_eq!(read_back, values);
        }
    }
}
