//! Process-wide mutexes serializing calls into non-thread-safe decoders.
//!
//! Independent pipelines may run on different threads but must contend on
//! these locks when they enter the guarded libraries. Initialization is
//! idempotent via lazy statics.

use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// Serializes legacy OLE record decoding (XLS, DOC, PPT).
pub static PARSER_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Serializes all calls into the PDF rendering library.
pub static PDFIUM_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Serializes charset conversion for decoders that share converter state.
pub static CHARSET_CONVERTER_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locks_are_reentrant_across_sequential_uses() {
        {
            let _g = PARSER_MUTEX.lock();
        }
        {
            let _g = PARSER_MUTEX.lock();
        }
    }

    #[test]
    fn test_independent_locks_can_be_held_together() {
        let _a = PDFIUM_MUTEX.lock();
        let _b = CHARSET_CONVERTER_MUTEX.lock();
    }
}
