//! Centralized constants for the binding engine
//!
//! Limits and reserved names in one place for easy tuning.

// ═══════════════════════════════════════════════════════════════
// Model layout
// ═══════════════════════════════════════════════════════════════

/// Key of the data object under the model root (`${x}` reads `data.x`)
pub const DATA_ROOT: &str = "data";

// ═══════════════════════════════════════════════════════════════
// Lifecycle script names
// ═══════════════════════════════════════════════════════════════

pub const SCRIPT_RENDER: &str = "render";
pub const SCRIPT_AFTER_LAYOUT: &str = "after_layout";
pub const SCRIPT_REMOVE: &str = "remove";

/// All lifecycle names; scripts under any other key are field-bound
pub const LIFECYCLE_SCRIPTS: [&str; 3] = [SCRIPT_RENDER, SCRIPT_AFTER_LAYOUT, SCRIPT_REMOVE];

// ═══════════════════════════════════════════════════════════════
// Limits
// ═══════════════════════════════════════════════════════════════

/// Default bound on nested `script()` / `self.x()` calls
pub const MAX_SCRIPT_DEPTH: usize = 16;

/// Distinct templates kept in the process-wide compile cache
pub const MAX_CACHED_TEMPLATES: usize = 512;

/// Tasks one `HostLoop::run_until_idle` call may run before it stops
pub const MAX_HOST_TASKS: usize = 10_000;

// ═══════════════════════════════════════════════════════════════
// Development mode
// ═══════════════════════════════════════════════════════════════

/// Class of the element showing a compile error inside the widget
pub const DEV_ERROR_CLASS: &str = "tessera-error";
