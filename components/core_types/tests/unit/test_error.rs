//! Unit tests for MemoryError

use core_types::{MemoryError, MemoryResult};

#[cfg(test)]
mod memory_error_tests {
    use super::*;

    fn fails() -> MemoryResult<u32> {
        Err(MemoryError::OutOfMemory { requested: 4096 })
    }

    fn propagates() -> MemoryResult<u32> {
        let v = fails()?;
        Ok(v + 1)
    }

    #[test]
    fn test_error_propagates_with_question_mark() {
        assert_eq!(propagates(), Err(MemoryError::OutOfMemory { requested: 4096 }));
    }

    #[test]
    fn test_error_is_std_error() {
        let err: Box<dyn std::error::Error> = Box::new(MemoryError::OutOfMemory { requested: 1 });
        assert_eq!(err.to_string(), "out of memory (1 bytes requested)");
    }

    #[test]
    fn test_from_reserve_reports_bytes() {
        let mut v: Vec<u8> = Vec::new();
        let reserve_err = v.try_reserve(usize::MAX).unwrap_err();
        let err = MemoryError::from_reserve(reserve_err, 10, 16);
        assert_eq!(err, MemoryError::OutOfMemory { requested: 160 });
    }
}
