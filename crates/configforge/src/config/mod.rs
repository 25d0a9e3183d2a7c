pub mod settings;

pub use settings::{default_settings_path, expand_tilde, Settings, ENV_KUBE_DIR, ENV_SSH_CONFIG};
