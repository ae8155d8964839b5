mod files;
mod headers;
mod size;
mod time;

// Export utility functions
pub use self::files::{create_dirs, output_file_name};
pub use self::headers::parse_headers;
pub use self::size::format_bytes;
pub use self::size::parse_size;
pub use self::time::format_duration;
pub use self::time::parse_duration;
