//! UI module for consistent CLI output
//!
//! Uses `cliclack` for spinners and prompts and `indicatif` for download
//! progress, with automatic fallback to plain lines in CI and when `--json`
//! output is requested.

mod context;
mod output;
mod progress;
mod prompts;
mod theme;

pub use context::UiContext;
pub use output::{
    key_value, remark, section, step_info, step_ok, step_ok_detail, step_warn, step_warn_hint,
};
pub use progress::{DownloadProgress, TaskSpinner};
pub use prompts::confirm;
pub use theme::{init_theme, RockTheme};
