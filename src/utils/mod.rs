pub mod file_utils; // Atomic writes and bounded-parallel directory removal
pub mod hash_utils;
pub mod path_utils; // Link-name sanitization and archive path safety
