pub mod buffer;
pub mod scanner;

pub use buffer::GrowableBuffer;
pub use scanner::{Cursor, LazyJson};

#[derive(Debug, thiserror::Error)]
pub enum JsonError {
    #[error("JSON scan error: {0}")]
    Scan(String),
}
