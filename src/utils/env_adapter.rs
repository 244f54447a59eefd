use std::sync::Mutex;

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Serialises process-environment writes; `set_var` is not thread-safe.
pub struct EnvAdapter;

impl EnvAdapter {
    pub fn set_var(key: &str, value: &str) {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        unsafe {
            std::env::set_var(key, value);
        }
    }

    pub fn remove_var(key: &str) {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        unsafe {
            std::env::remove_var(key);
        }
    }

    /// Parses a boolean flag: `1`, `true`, `yes`, `on` (case-insensitive).
    pub fn flag(key: &str) -> bool {
        std::env::var(key)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false)
    }
}
