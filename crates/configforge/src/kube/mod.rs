//! Kubernetes config files: codec, store and monitoring.

pub mod codec;
pub mod file;
pub mod marker;
pub mod model;
pub mod monitor;
pub mod synchronizer;

pub use codec::{decode, decode_validated, encode, validate_structure, StructuralError};
pub use file::{ConfigFile, FileStatus, FileType};
pub use marker::{ActiveConfigTracker, CommentMarker};
pub use model::KubeConfig;
pub use monitor::StoreMonitor;
pub use synchronizer::{normalize_file_name, ConfigSynchronizer, StoreLayout};
