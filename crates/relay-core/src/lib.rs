//! Foundational low-level utilities shared across relay crates.
//!
//! Provides atomic file-write helpers, wall-clock helpers, and poison-tolerant
//! mutex locking used by the runtime cache, call timing, and the session
//! cancellation registry.

pub mod atomic_io;
pub mod sync_utils;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use sync_utils::lock_unpoisoned;
pub use time_utils::{current_unix_timestamp_ms, elapsed_ms};

#[cfg(test)]
mod tests {
    use std::fs::read_to_string;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use super::*;

    #[test]
    fn unix_timestamp_ms_is_monotonic_enough_for_call_timing() {
        let before = current_unix_timestamp_ms();
        let after = current_unix_timestamp_ms();
        assert!(before > 1_600_000_000_000);
        assert!(after >= before);
    }

    #[test]
    fn elapsed_ms_saturates_for_future_instants() {
        let future = Instant::now() + Duration::from_secs(60);
        assert_eq!(elapsed_ms(future), 0);
    }

    #[test]
    fn write_text_atomic_writes_content() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("nested/sample.txt");
        write_text_atomic(&path, "hello world").expect("write");
        let contents = read_to_string(&path).expect("read");
        assert_eq!(contents, "hello world");

        write_text_atomic(&path, "replaced").expect("overwrite");
        assert_eq!(read_to_string(&path).expect("read"), "replaced");
        let leftovers = std::fs::read_dir(path.parent().expect("parent"))
            .expect("list")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn write_text_atomic_rejects_directory_destination() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let error = write_text_atomic(tempdir.path(), "x").expect_err("directory should fail");
        assert!(error.to_string().contains("is a directory"));
    }

    #[test]
    fn lock_unpoisoned_recovers_after_panicking_holder() {
        let shared = Arc::new(Mutex::new(7_u32));
        let poisoner = Arc::clone(&shared);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().expect("lock");
            panic!("poison the mutex");
        })
        .join();
        assert!(shared.is_poisoned());
        assert_eq!(*lock_unpoisoned(&shared), 7);
    }
}
