//! Environment constants and path utilities for bulwark.
//!
//! This module centralizes the hardcoded names, keys and directory layout
//! used throughout the crate, making them easier to maintain and modify.

use std::path::{Path, PathBuf};

/// Main application directory name (hidden directory like .git, .vscode)
pub const BULWARK_DIR_NAME: &str = ".bulwark";

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name looked up directly in the working directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "bulwark.toml";

/// Session persistence keys and directories
pub mod session {
    /// Store directory name within .bulwark
    pub const STORE_DIR_NAME: &str = "store";

    /// Well-known key under which the session snapshot is stored
    pub const SNAPSHOT_KEY: &str = "session.snapshot";

    /// Snapshot envelope format understood by this build
    pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;
}

/// Hook operation names used by the queue and the session layer
pub mod operations {
    /// Runs before a task handler; pre hooks may rewrite the payload
    pub const TASK_BEFORE: &str = "task.before";

    /// Runs after a task handler with the handler output as content
    pub const TASK_AFTER: &str = "task.after";

    /// Runs before a session snapshot is written
    pub const SESSION_SAVE: &str = "session.save";

    /// Runs after a session snapshot is read back
    pub const SESSION_RESTORE: &str = "session.restore";

    /// Operations a hook joins when registered without an explicit operation
    pub const DEFAULT_OPERATIONS: [&str; 4] = [TASK_BEFORE, TASK_AFTER, SESSION_SAVE, SESSION_RESTORE];
}

/// Test-related constants
pub mod test {
    /// Test session identifier
    pub const TEST_SESSION_ID: &str = "test-session";
}

/// Build the main .bulwark directory path from a workspace root
pub fn bulwark_dir_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(BULWARK_DIR_NAME)
}

/// Build the key-value store directory path from a workspace root
pub fn store_dir_path(workspace_root: &Path) -> PathBuf {
    bulwark_dir_path(workspace_root).join(session::STORE_DIR_NAME)
}

/// Build config directory path in user's home directory
pub fn user_config_dir_path(home_dir: &Path) -> PathBuf {
    home_dir.join(BULWARK_DIR_NAME)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    user_config_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build local config file path in current directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(BULWARK_DIR_NAME).join(CONFIG_FILE_NAME)
}
