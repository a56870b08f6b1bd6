//! Condition bookkeeping.
//!
//! The manager owns no state besides its clock. Every operation works on a
//! caller-owned [`Conditions`] list through slot indices, never through a
//! reference that could outlive a reallocation.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use pd_operator_core::{ConditionStatus, ConditionType, Conditions};

/// Source of "now" for transition stamps.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `now`.
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Move the clock to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    /// Move the clock forward, saturating at the maximum representable time.
    pub fn advance(&self, by: chrono::TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = now.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Maintains a type-keyed condition list with transition-time tracking.
#[derive(Clone)]
pub struct ConditionManager {
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for ConditionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionManager").finish_non_exhaustive()
    }
}

impl Default for ConditionManager {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl ConditionManager {
    /// Create a manager stamping with `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Set a condition, appending a slot for `type_` when absent.
    ///
    /// `last_transition_time` moves to "now" when the slot is new or when
    /// the message, status, reason or type differ from what the slot held.
    /// An empty `message` leaves the stored message in place.
    ///
    /// Returns whether the transition time was stamped.
    pub fn set_condition(
        &self,
        conditions: &mut Conditions,
        type_: ConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) -> bool {
        let now = self.clock.now();
        let (index, existed) = self.find_condition(conditions, type_);
        let Some(slot) = conditions.slot_mut(index) else {
            return false;
        };

        let transitioned = !existed
            || slot.message != message
            || slot.status != status
            || slot.reason != reason
            || slot.type_ != type_.as_str();
        if transitioned {
            slot.last_transition_time = Some(now);
        }
        if !message.is_empty() {
            slot.message = message.to_string();
        }
        reason.clone_into(&mut slot.reason);
        slot.status = status;

        transitioned
    }

    /// Slot index for `type_`, appending a zero-valued placeholder when
    /// absent. The flag reports whether the slot existed before the call.
    pub fn find_condition(&self, conditions: &mut Conditions, type_: ConditionType) -> (usize, bool) {
        conditions.upsert(type_.as_str())
    }

    /// Whether a condition of `type_` exists. Never mutates.
    pub fn has_condition(&self, conditions: &Conditions, type_: ConditionType) -> bool {
        conditions.contains(type_.as_str())
    }
}
