pub mod filesystem;

pub use filesystem::{hidden_backup_path, is_hidden, FileStore, FileTimes};
