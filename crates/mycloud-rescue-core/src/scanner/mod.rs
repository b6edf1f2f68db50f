pub mod walk;

pub use walk::{collect_source_files, count_files, directory_summary, files_under, DirSummary};
