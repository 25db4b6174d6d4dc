//! Tier placement engine
//!
//! Selects a tier for each write based on size thresholds, promotes blobs
//! on access and demotes them by age, and resolves reads by walking tiers
//! in order. A tier without a backend, or with its enable flag off, is
//! treated as disabled; hot is always on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use crate::backend::StorageBackend;
use crate::config::{ConfigChange, DemotionPolicy, PromotionPolicy, TierConfig};
use crate::error::FsError;
use crate::logging::*;
use crate::types::Tier;

const MS_PER_DAY: i64 = 86_400_000;

/// Per-blob access bookkeeping feeding the promotion policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRecord {
	pub count: u64,
	pub last_access_ms: i64,
}

type WatcherFn = Box<dyn Fn(&ConfigChange) + Send + Sync>;

/// Registration handle returned by `on_config_change`
pub struct ConfigSubscription {
	id: u64,
	manager: Weak<TierManager>,
}

impl ConfigSubscription {
	/// Remove the watcher; dropping the subscription without calling this
	/// leaves the watcher installed
	pub fn unsubscribe(self) {
		if let Some(manager) = self.manager.upgrade() {
			manager.lock_watchers().retain(|(id, _)| *id != self.id);
		}
	}
}

/// The placement engine
pub struct TierManager {
	config: RwLock<TierConfig>,
	hot: Arc<dyn StorageBackend>,
	warm: Option<Arc<dyn StorageBackend>>,
	cold: Option<Arc<dyn StorageBackend>>,
	watchers: Mutex<Vec<(u64, WatcherFn)>>,
	next_watcher_id: AtomicU64,
	access: Mutex<HashMap<String, AccessRecord>>,
	available: Mutex<Option<Vec<Tier>>>,
}

impl TierManager {
	pub fn new(
		config: TierConfig,
		hot: Arc<dyn StorageBackend>,
		warm: Option<Arc<dyn StorageBackend>>,
		cold: Option<Arc<dyn StorageBackend>>,
	) -> Result<Self, FsError> {
		config.validate()?;
		Ok(TierManager {
			config: RwLock::new(config),
			hot,
			warm,
			cold,
			watchers: Mutex::new(Vec::new()),
			next_watcher_id: AtomicU64::new(1),
			access: Mutex::new(HashMap::new()),
			available: Mutex::new(None),
		})
	}

	fn lock_watchers(&self) -> std::sync::MutexGuard<'_, Vec<(u64, WatcherFn)>> {
		self.watchers.lock().unwrap_or_else(|poison| poison.into_inner())
	}

	/// Snapshot of the current configuration
	pub fn config(&self) -> TierConfig {
		self.config.read().unwrap_or_else(|poison| poison.into_inner()).clone()
	}

	/// Whether a tier is usable: enable flag set and backend present
	pub fn enabled(&self, tier: Tier) -> bool {
		let config = self.config.read().unwrap_or_else(|poison| poison.into_inner());
		match tier {
			Tier::Hot => true,
			Tier::Warm => config.warm_enabled && self.warm.is_some(),
			Tier::Cold => config.cold_enabled && self.cold.is_some(),
		}
	}

	/// Backend serving a tier; `None` when the tier is disabled
	pub fn backend_for(&self, tier: Tier) -> Option<Arc<dyn StorageBackend>> {
		if !self.enabled(tier) {
			return None;
		}
		match tier {
			Tier::Hot => Some(self.hot.clone()),
			Tier::Warm => self.warm.clone(),
			Tier::Cold => self.cold.clone(),
		}
	}

	/// Enabled tiers in hot-first order; cached until the config changes
	pub fn available_tiers(&self) -> Vec<Tier> {
		let mut cache = self.available.lock().unwrap_or_else(|poison| poison.into_inner());
		if let Some(tiers) = cache.as_ref() {
			return tiers.clone();
		}
		let tiers: Vec<Tier> = Tier::ALL.iter().copied().filter(|t| self.enabled(*t)).collect();
		*cache = Some(tiers.clone());
		tiers
	}

	/// Tier walk order for resolving a read: the blob's own tier first,
	/// then the remaining enabled tiers hot-first
	pub fn read_order(&self, tier: Tier) -> Vec<Tier> {
		let mut order = vec![tier];
		for t in self.available_tiers() {
			if t != tier {
				order.push(t);
			}
		}
		order
	}

	/// Placement decision for a new write of `size` bytes
	pub fn place(&self, size: u64) -> Tier {
		let config = self.config();
		if size <= config.thresholds.hot_max_size {
			return Tier::Hot;
		}
		if self.enabled(Tier::Warm) && size <= config.thresholds.warm_max_size {
			return Tier::Warm;
		}
		if self.enabled(Tier::Cold) {
			return Tier::Cold;
		}
		// Fall back by priority when the natural tier is unavailable
		if self.enabled(Tier::Warm) {
			Tier::Warm
		} else {
			Tier::Hot
		}
	}

	/// Note a read of a blob; returns the updated record
	pub fn record_access(&self, blob_id: &str, now_ms: i64) -> AccessRecord {
		let mut access = self.access.lock().unwrap_or_else(|poison| poison.into_inner());
		let record = access
			.entry(blob_id.to_string())
			.or_insert(AccessRecord { count: 0, last_access_ms: now_ms });
		record.count += 1;
		record.last_access_ms = now_ms;
		*record
	}

	/// Forget access bookkeeping for a deleted blob
	pub fn forget_access(&self, blob_id: &str) {
		self.access.lock().unwrap_or_else(|poison| poison.into_inner()).remove(blob_id);
	}

	pub fn access_record(&self, blob_id: &str) -> Option<AccessRecord> {
		self.access.lock().unwrap_or_else(|poison| poison.into_inner()).get(blob_id).copied()
	}

	/// Promotion target for a file blob, if any
	///
	/// Under `aggressive` any access that fits the target size promotes;
	/// under `on-access` the access record must additionally satisfy the
	/// promotion thresholds.
	pub fn promotion_target(
		&self,
		current: Tier,
		size: u64,
		access: Option<AccessRecord>,
		now_ms: i64,
	) -> Option<Tier> {
		let config = self.config();
		if current == Tier::Hot || config.promotion_policy == PromotionPolicy::None {
			return None;
		}

		let target = match current {
			Tier::Warm => Tier::Hot,
			Tier::Cold => {
				if self.enabled(Tier::Warm) {
					Tier::Warm
				} else {
					Tier::Hot
				}
			}
			Tier::Hot => return None,
		};

		let max = match target {
			Tier::Hot => config.thresholds.hot_max_size,
			Tier::Warm => config.thresholds.warm_max_size,
			Tier::Cold => u64::MAX,
		};
		if size > max {
			return None;
		}

		match config.promotion_policy {
			PromotionPolicy::Aggressive => Some(target),
			PromotionPolicy::OnAccess => {
				let record = access?;
				let fresh = now_ms - record.last_access_ms
					<= config.promotion_thresholds.max_age_days as i64 * MS_PER_DAY;
				if record.count >= config.promotion_thresholds.min_access_count && fresh {
					Some(target)
				} else {
					None
				}
			}
			PromotionPolicy::None => None,
		}
	}

	/// Demotion target for an idle blob, if any
	pub fn demotion_target(
		&self,
		current: Tier,
		last_access_ms: i64,
		now_ms: i64,
	) -> Option<Tier> {
		let config = self.config();
		if current == Tier::Cold || config.demotion_policy == DemotionPolicy::None {
			return None;
		}

		let idle = now_ms - last_access_ms;
		match current {
			Tier::Hot => {
				if idle <= config.demotion_thresholds.hot_max_age_days as i64 * MS_PER_DAY {
					return None;
				}
				if self.enabled(Tier::Warm) {
					Some(Tier::Warm)
				} else if self.enabled(Tier::Cold) {
					Some(Tier::Cold)
				} else {
					None
				}
			}
			Tier::Warm => {
				if idle <= config.demotion_thresholds.warm_max_age_days as i64 * MS_PER_DAY {
					return None;
				}
				if self.enabled(Tier::Cold) {
					Some(Tier::Cold)
				} else {
					None
				}
			}
			Tier::Cold => None,
		}
	}

	/// Replace the configuration, emitting one `configChange` event per
	/// changed field; disabling hot is an error
	pub fn update_config(&self, new: TierConfig) -> Result<Vec<ConfigChange>, FsError> {
		new.validate()?;
		let changes = {
			let mut config = self.config.write().unwrap_or_else(|poison| poison.into_inner());
			let changes = config.diff(&new);
			*config = new;
			changes
		};

		if !changes.is_empty() {
			*self.available.lock().unwrap_or_else(|poison| poison.into_inner()) = None;
			let watchers = self.lock_watchers();
			for change in &changes {
				debug!("tier config change: {} {} -> {}", change.field, change.old, change.new);
				for (_, watcher) in watchers.iter() {
					watcher(change);
				}
			}
		}
		Ok(changes)
	}

	/// Register a configuration watcher; the returned subscription
	/// unsubscribes it
	pub fn on_config_change(
		self: &Arc<Self>,
		watcher: impl Fn(&ConfigChange) + Send + Sync + 'static,
	) -> ConfigSubscription {
		let id = self.next_watcher_id.fetch_add(1, Ordering::SeqCst);
		self.lock_watchers().push((id, Box::new(watcher)));
		ConfigSubscription { id, manager: Arc::downgrade(self) }
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::MemoryBackend;

	fn manager(config: TierConfig, warm: bool, cold: bool) -> Arc<TierManager> {
		Arc::new(
			TierManager::new(
				config,
				Arc::new(MemoryBackend::new()),
				warm.then(|| Arc::new(MemoryBackend::new()) as Arc<dyn StorageBackend>),
				cold.then(|| Arc::new(MemoryBackend::new()) as Arc<dyn StorageBackend>),
			)
			.unwrap(),
		)
	}

	fn config_with_thresholds(hot: u64, warm: u64) -> TierConfig {
		let mut config = TierConfig::default();
		config.thresholds.hot_max_size = hot;
		config.thresholds.warm_max_size = warm;
		config
	}

	#[test]
	fn test_placement_boundaries() {
		let mgr = manager(config_with_thresholds(100, 1000), true, true);
		assert_eq!(mgr.place(100), Tier::Hot);
		assert_eq!(mgr.place(101), Tier::Warm);
		assert_eq!(mgr.place(1000), Tier::Warm);
		assert_eq!(mgr.place(1001), Tier::Cold);
	}

	#[test]
	fn test_placement_fallback_when_tiers_missing() {
		// No cold: oversized payloads fall back to warm
		let mgr = manager(config_with_thresholds(100, 1000), true, false);
		assert_eq!(mgr.place(5000), Tier::Warm);

		// Hot only: everything lands hot
		let mgr = manager(config_with_thresholds(100, 1000), false, false);
		assert_eq!(mgr.place(5000), Tier::Hot);
		assert_eq!(mgr.available_tiers(), vec![Tier::Hot]);
	}

	#[test]
	fn test_disabled_flag_overrides_backend_presence() {
		let mut config = config_with_thresholds(100, 1000);
		config.warm_enabled = false;
		let mgr = manager(config, true, true);
		assert!(!mgr.enabled(Tier::Warm));
		assert_eq!(mgr.place(500), Tier::Cold);
	}

	#[test]
	fn test_read_order_starts_at_own_tier() {
		let mgr = manager(TierConfig::default(), true, true);
		assert_eq!(mgr.read_order(Tier::Warm), vec![Tier::Warm, Tier::Hot, Tier::Cold]);
		assert_eq!(mgr.read_order(Tier::Hot), vec![Tier::Hot, Tier::Warm, Tier::Cold]);
	}

	#[test]
	fn test_promotion_aggressive() {
		let mut config = TierConfig::default();
		config.promotion_policy = PromotionPolicy::Aggressive;
		let mgr = manager(config, true, true);

		assert_eq!(mgr.promotion_target(Tier::Warm, 100, None, 0), Some(Tier::Hot));
		assert_eq!(mgr.promotion_target(Tier::Cold, 100, None, 0), Some(Tier::Warm));
		// Hot never promotes
		assert_eq!(mgr.promotion_target(Tier::Hot, 100, None, 0), None);
		// Too large for the target
		let too_big = mgr.config().thresholds.hot_max_size + 1;
		assert_eq!(mgr.promotion_target(Tier::Warm, too_big, None, 0), None);
	}

	#[test]
	fn test_promotion_cold_skips_disabled_warm() {
		let mut config = TierConfig::default();
		config.promotion_policy = PromotionPolicy::Aggressive;
		config.warm_enabled = false;
		let mgr = manager(config, false, true);
		assert_eq!(mgr.promotion_target(Tier::Cold, 100, None, 0), Some(Tier::Hot));
	}

	#[test]
	fn test_promotion_on_access_thresholds() {
		let mut config = TierConfig::default();
		config.promotion_policy = PromotionPolicy::OnAccess;
		config.promotion_thresholds.min_access_count = 3;
		config.promotion_thresholds.max_age_days = 1;
		let mgr = manager(config, true, true);

		let now = 10 * MS_PER_DAY;
		let cold_record = AccessRecord { count: 5, last_access_ms: now - 2 * MS_PER_DAY };
		let fresh_but_rare = AccessRecord { count: 2, last_access_ms: now };
		let fresh_and_hot = AccessRecord { count: 3, last_access_ms: now };

		assert_eq!(mgr.promotion_target(Tier::Warm, 100, None, now), None);
		assert_eq!(mgr.promotion_target(Tier::Warm, 100, Some(cold_record), now), None);
		assert_eq!(mgr.promotion_target(Tier::Warm, 100, Some(fresh_but_rare), now), None);
		assert_eq!(mgr.promotion_target(Tier::Warm, 100, Some(fresh_and_hot), now), Some(Tier::Hot));
	}

	#[test]
	fn test_demotion_by_age() {
		let mut config = TierConfig::default();
		config.demotion_thresholds.hot_max_age_days = 10;
		config.demotion_thresholds.warm_max_age_days = 20;
		let mgr = manager(config, true, true);

		let now = 100 * MS_PER_DAY;
		assert_eq!(mgr.demotion_target(Tier::Hot, now - 5 * MS_PER_DAY, now), None);
		assert_eq!(mgr.demotion_target(Tier::Hot, now - 11 * MS_PER_DAY, now), Some(Tier::Warm));
		assert_eq!(mgr.demotion_target(Tier::Warm, now - 21 * MS_PER_DAY, now), Some(Tier::Cold));
		assert_eq!(mgr.demotion_target(Tier::Cold, 0, now), None);
	}

	#[test]
	fn test_demotion_skips_disabled_tiers() {
		let mut config = TierConfig::default();
		config.warm_enabled = false;
		config.demotion_thresholds.hot_max_age_days = 1;
		let mgr = manager(config, false, true);
		let now = 10 * MS_PER_DAY;
		assert_eq!(mgr.demotion_target(Tier::Hot, 0, now), Some(Tier::Cold));

		let mgr = manager(TierConfig::default(), true, false);
		assert_eq!(mgr.demotion_target(Tier::Warm, 0, now), None);
	}

	#[test]
	fn test_demotion_none_policy() {
		let mut config = TierConfig::default();
		config.demotion_policy = DemotionPolicy::None;
		let mgr = manager(config, true, true);
		assert_eq!(mgr.demotion_target(Tier::Hot, 0, i64::MAX / 2), None);
	}

	#[test]
	fn test_access_recording() {
		let mgr = manager(TierConfig::default(), true, true);
		let first = mgr.record_access("b1", 1000);
		assert_eq!(first, AccessRecord { count: 1, last_access_ms: 1000 });
		let second = mgr.record_access("b1", 2000);
		assert_eq!(second, AccessRecord { count: 2, last_access_ms: 2000 });
		mgr.forget_access("b1");
		assert_eq!(mgr.access_record("b1"), None);
	}

	#[test]
	fn test_config_change_events_and_unsubscribe() {
		let mgr = manager(TierConfig::default(), true, true);
		let seen = Arc::new(Mutex::new(Vec::new()));
		let seen_in = seen.clone();
		let sub = mgr.on_config_change(move |change| {
			seen_in.lock().unwrap().push(change.field);
		});

		let mut new = mgr.config();
		new.warm_enabled = false;
		new.thresholds.hot_max_size = 7;
		let changes = mgr.update_config(new.clone()).unwrap();
		assert_eq!(changes.len(), 2);
		assert_eq!(seen.lock().unwrap().len(), 2);

		// Tier availability cache refreshed
		assert_eq!(mgr.available_tiers(), vec![Tier::Hot, Tier::Cold]);

		sub.unsubscribe();
		let mut newer = mgr.config();
		newer.cold_enabled = false;
		mgr.update_config(newer).unwrap();
		assert_eq!(seen.lock().unwrap().len(), 2);
	}

	#[test]
	fn test_update_config_rejects_disabled_hot() {
		let mgr = manager(TierConfig::default(), true, true);
		let mut bad = mgr.config();
		bad.hot_enabled = false;
		assert!(mgr.update_config(bad).is_err());
	}
}

// vim: ts=4
