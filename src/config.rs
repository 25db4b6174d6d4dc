//! Unified configuration for tier placement
//!
//! All placement knobs live in a single `TierConfig` struct. The
//! configuration follows a priority chain:
//! 1. Built-in defaults / named presets
//! 2. Config file (TOML)
//! 3. Environment variables (TIERFS_* prefix)
//! 4. Programmatic updates (highest priority)

use serde::{Deserialize, Serialize};

use crate::error::FsError;

/// Size thresholds steering new writes into a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TierThresholds {
	/// Largest payload (bytes) that lands in the hot tier
	pub hot_max_size: u64,

	/// Largest payload (bytes) that lands in the warm tier
	pub warm_max_size: u64,
}

impl Default for TierThresholds {
	fn default() -> Self {
		TierThresholds { hot_max_size: 1024 * 1024, warm_max_size: 64 * 1024 * 1024 }
	}
}

/// When a blob may move to a faster tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromotionPolicy {
	None,
	OnAccess,
	Aggressive,
}

impl PromotionPolicy {
	pub fn parse(s: &str) -> Option<Self> {
		match s {
			"none" => Some(PromotionPolicy::None),
			"on-access" => Some(PromotionPolicy::OnAccess),
			"aggressive" => Some(PromotionPolicy::Aggressive),
			_ => None,
		}
	}
}

/// When a blob may move to a slower tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DemotionPolicy {
	None,
	OnAge,
}

impl DemotionPolicy {
	pub fn parse(s: &str) -> Option<Self> {
		match s {
			"none" => Some(DemotionPolicy::None),
			"on-age" => Some(DemotionPolicy::OnAge),
			_ => None,
		}
	}
}

/// Access requirements for `on-access` promotion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PromotionThresholds {
	/// Minimum access count before promotion
	pub min_access_count: u64,

	/// Accesses older than this many days do not count
	pub max_age_days: u64,
}

impl Default for PromotionThresholds {
	fn default() -> Self {
		PromotionThresholds { min_access_count: 3, max_age_days: 30 }
	}
}

/// Idle ages that trigger `on-age` demotion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DemotionThresholds {
	/// Days without access before a hot blob demotes
	pub hot_max_age_days: u64,

	/// Days without access before a warm blob demotes
	pub warm_max_age_days: u64,
}

impl Default for DemotionThresholds {
	fn default() -> Self {
		DemotionThresholds { hot_max_age_days: 30, warm_max_age_days: 90 }
	}
}

/// Unified tier placement configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TierConfig {
	pub thresholds: TierThresholds,

	/// The hot tier can never be disabled; validation rejects `false`
	pub hot_enabled: bool,

	pub warm_enabled: bool,
	pub cold_enabled: bool,

	pub promotion_policy: PromotionPolicy,
	pub demotion_policy: DemotionPolicy,

	pub promotion_thresholds: PromotionThresholds,
	pub demotion_thresholds: DemotionThresholds,

	/// Default permission bits for created files
	pub default_mode: u32,

	/// Default permission bits for created directories
	pub default_dir_mode: u32,

	/// Optional prefix applied to every caller path
	pub base_path: Option<String>,
}

impl Default for TierConfig {
	fn default() -> Self {
		TierConfig {
			thresholds: TierThresholds::default(),
			hot_enabled: true,
			warm_enabled: true,
			cold_enabled: true,
			promotion_policy: PromotionPolicy::OnAccess,
			demotion_policy: DemotionPolicy::OnAge,
			promotion_thresholds: PromotionThresholds::default(),
			demotion_thresholds: DemotionThresholds::default(),
			default_mode: 0o644,
			default_dir_mode: 0o755,
			base_path: None,
		}
	}
}

/// A single changed configuration field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChange {
	pub field: &'static str,
	pub old: String,
	pub new: String,
}

impl TierConfig {
	/// Named preset seeding the configuration from a fixed table
	pub fn preset(name: &str) -> Result<Self, FsError> {
		let mut config = TierConfig::default();
		match name {
			"aggressive" => {
				config.thresholds = TierThresholds {
					hot_max_size: 4 * 1024 * 1024,
					warm_max_size: 256 * 1024 * 1024,
				};
				config.promotion_policy = PromotionPolicy::Aggressive;
				config.demotion_policy = DemotionPolicy::OnAge;
				config.promotion_thresholds =
					PromotionThresholds { min_access_count: 1, max_age_days: 7 };
				config.demotion_thresholds =
					DemotionThresholds { hot_max_age_days: 7, warm_max_age_days: 30 };
			}
			"balanced" => {}
			"conservative" => {
				config.thresholds = TierThresholds {
					hot_max_size: 256 * 1024,
					warm_max_size: 16 * 1024 * 1024,
				};
				config.promotion_policy = PromotionPolicy::None;
				config.demotion_policy = DemotionPolicy::OnAge;
				config.demotion_thresholds =
					DemotionThresholds { hot_max_age_days: 90, warm_max_age_days: 365 };
			}
			_ => {
				return Err(FsError::invalid("config", name, "unknown preset"));
			}
		}
		Ok(config)
	}

	/// Check internal consistency
	pub fn validate(&self) -> Result<(), FsError> {
		if !self.hot_enabled {
			return Err(FsError::invalid("config", "hotEnabled", "hot tier cannot be disabled"));
		}
		if self.thresholds.hot_max_size > self.thresholds.warm_max_size {
			return Err(FsError::invalid(
				"config",
				"thresholds",
				"hotMaxSize must not exceed warmMaxSize",
			));
		}
		if let Some(base) = &self.base_path {
			if !base.starts_with('/') {
				return Err(FsError::invalid("config", base, "basePath must be absolute"));
			}
		}
		Ok(())
	}

	/// Merge `TIERFS_*` environment variables on top of this configuration
	///
	/// One variable per field; numeric fields parse as decimal, modes as
	/// octal, booleans as `true`/`false`/`1`/`0`, policies by enum name.
	pub fn apply_env_overrides(&mut self) {
		if let Some(v) = env_u64("TIERFS_HOT_MAX_SIZE") {
			self.thresholds.hot_max_size = v;
		}
		if let Some(v) = env_u64("TIERFS_WARM_MAX_SIZE") {
			self.thresholds.warm_max_size = v;
		}
		if let Some(v) = env_bool("TIERFS_HOT_ENABLED") {
			self.hot_enabled = v;
		}
		if let Some(v) = env_bool("TIERFS_WARM_ENABLED") {
			self.warm_enabled = v;
		}
		if let Some(v) = env_bool("TIERFS_COLD_ENABLED") {
			self.cold_enabled = v;
		}
		if let Some(v) = std::env::var("TIERFS_PROMOTION_POLICY").ok().and_then(|s| PromotionPolicy::parse(&s)) {
			self.promotion_policy = v;
		}
		if let Some(v) = std::env::var("TIERFS_DEMOTION_POLICY").ok().and_then(|s| DemotionPolicy::parse(&s)) {
			self.demotion_policy = v;
		}
		if let Some(v) = env_u64("TIERFS_PROMOTION_MIN_ACCESS_COUNT") {
			self.promotion_thresholds.min_access_count = v;
		}
		if let Some(v) = env_u64("TIERFS_PROMOTION_MAX_AGE_DAYS") {
			self.promotion_thresholds.max_age_days = v;
		}
		if let Some(v) = env_u64("TIERFS_DEMOTION_HOT_MAX_AGE_DAYS") {
			self.demotion_thresholds.hot_max_age_days = v;
		}
		if let Some(v) = env_u64("TIERFS_DEMOTION_WARM_MAX_AGE_DAYS") {
			self.demotion_thresholds.warm_max_age_days = v;
		}
		if let Some(v) = env_octal("TIERFS_DEFAULT_MODE") {
			self.default_mode = v;
		}
		if let Some(v) = env_octal("TIERFS_DEFAULT_DIR_MODE") {
			self.default_dir_mode = v;
		}
		if let Ok(v) = std::env::var("TIERFS_BASE_PATH") {
			self.base_path = if v.is_empty() { None } else { Some(v) };
		}
	}

	/// Parse a TOML configuration document
	pub fn from_toml_str(doc: &str) -> Result<Self, FsError> {
		let config: TierConfig = toml::from_str(doc)
			.map_err(|e| FsError::invalid("config", "", format!("invalid config: {}", e)))?;
		config.validate()?;
		Ok(config)
	}

	/// Serialize to a TOML document
	pub fn to_toml_string(&self) -> Result<String, FsError> {
		toml::to_string_pretty(self)
			.map_err(|e| FsError::invalid("config", "", format!("serialize config: {}", e)))
	}

	/// Field-level difference against `other`, one change per field
	pub fn diff(&self, other: &TierConfig) -> Vec<ConfigChange> {
		let mut changes = Vec::new();
		let mut push = |field: &'static str, old: String, new: String| {
			if old != new {
				changes.push(ConfigChange { field, old, new });
			}
		};

		push(
			"thresholds.hotMaxSize",
			self.thresholds.hot_max_size.to_string(),
			other.thresholds.hot_max_size.to_string(),
		);
		push(
			"thresholds.warmMaxSize",
			self.thresholds.warm_max_size.to_string(),
			other.thresholds.warm_max_size.to_string(),
		);
		push("hotEnabled", self.hot_enabled.to_string(), other.hot_enabled.to_string());
		push("warmEnabled", self.warm_enabled.to_string(), other.warm_enabled.to_string());
		push("coldEnabled", self.cold_enabled.to_string(), other.cold_enabled.to_string());
		push(
			"promotionPolicy",
			format!("{:?}", self.promotion_policy),
			format!("{:?}", other.promotion_policy),
		);
		push(
			"demotionPolicy",
			format!("{:?}", self.demotion_policy),
			format!("{:?}", other.demotion_policy),
		);
		push(
			"promotionThresholds.minAccessCount",
			self.promotion_thresholds.min_access_count.to_string(),
			other.promotion_thresholds.min_access_count.to_string(),
		);
		push(
			"promotionThresholds.maxAgeDays",
			self.promotion_thresholds.max_age_days.to_string(),
			other.promotion_thresholds.max_age_days.to_string(),
		);
		push(
			"demotionThresholds.hotMaxAgeDays",
			self.demotion_thresholds.hot_max_age_days.to_string(),
			other.demotion_thresholds.hot_max_age_days.to_string(),
		);
		push(
			"demotionThresholds.warmMaxAgeDays",
			self.demotion_thresholds.warm_max_age_days.to_string(),
			other.demotion_thresholds.warm_max_age_days.to_string(),
		);
		push("defaultMode", format!("{:o}", self.default_mode), format!("{:o}", other.default_mode));
		push(
			"defaultDirMode",
			format!("{:o}", self.default_dir_mode),
			format!("{:o}", other.default_dir_mode),
		);
		push(
			"basePath",
			self.base_path.clone().unwrap_or_default(),
			other.base_path.clone().unwrap_or_default(),
		);
		changes
	}
}

fn env_u64(name: &str) -> Option<u64> {
	std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_octal(name: &str) -> Option<u32> {
	std::env::var(name).ok().and_then(|v| u32::from_str_radix(v.trim_start_matches("0o"), 8).ok())
}

fn env_bool(name: &str) -> Option<bool> {
	match std::env::var(name).ok()?.to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" => Some(true),
		"0" | "false" | "no" => Some(false),
		_ => None,
	}
}


// vim: ts=4
