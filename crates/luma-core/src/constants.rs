//! Application-wide constants
//!
//! Centralized location for storage names and tuning values
//! that are used across multiple modules.

/// Fixed storage name for the persisted local profile (the user identity only).
pub const IDENTITY_STORAGE_NAME: &str = "gallery-storage";

/// Default data directory when none is configured
pub const DEFAULT_DATA_DIR: &str = "luma_data";

/// Default Unsplash API base URL
pub const UNSPLASH_API_BASE: &str = "https://api.unsplash.com";

/// Alt text used when the photo source has none
pub const DEFAULT_ALT_TEXT: &str = "Untitled";

// Pagination defaults
/// Images requested per infinite-scroll page
pub const DEFAULT_PAGE_SIZE: usize = 6;
/// Images requested by an explicit seed/refresh
pub const DEFAULT_SEED_COUNT: usize = 10;
/// Delay after a fetch completes before another proximity signal may trigger
pub const DEFAULT_FETCH_COOLDOWN_MS: u64 = 1000;

/// Quick reactions offered on every photo card
pub const QUICK_REACTIONS: [&str; 2] = ["🔥", "❤️"];

/// Names offered to anonymous participants
pub const IDENTITY_NAMES: [&str; 8] = [
    "Alex", "Jordan", "Taylor", "Morgan", "Casey", "Jamie", "Riley", "Avery",
];

/// Color tags offered to anonymous participants
pub const IDENTITY_COLORS: [&str; 7] = [
    "#EF4444", "#F59E0B", "#10B981", "#3B82F6", "#6366F1", "#8B5CF6", "#EC4899",
];
