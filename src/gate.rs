//! The lifecycle gate separating customization from use.
//!
//! Every registry shares one [`Gate`]. While it is [`Phase::Customizing`],
//! registrations are accepted and nothing may be read; after the one-way
//! [`Gate::lock`] transition the registries are frozen and become usable.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::error::PhaseError;

/// The two lifecycle phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Customizing,
    LockedDown,
}

/// Two-state, one-way lifecycle gate.
#[derive(Debug, Default)]
pub struct Gate {
    locked: AtomicBool,
}

impl Gate {
    /// Create a gate in the customizing phase.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        if self.locked.load(Ordering::Acquire) {
            Phase::LockedDown
        } else {
            Phase::Customizing
        }
    }

    /// Fails unless customizations are still allowed.
    pub fn check_can_customize(&self) -> Result<(), PhaseError> {
        match self.phase() {
            Phase::Customizing => Ok(()),
            Phase::LockedDown => Err(PhaseError::NotCustomizing),
        }
    }

    /// Fails unless customizations have been locked down.
    pub fn check_locked_down(&self) -> Result<(), PhaseError> {
        match self.phase() {
            Phase::LockedDown => Ok(()),
            Phase::Customizing => Err(PhaseError::NotLockedDown),
        }
    }

    /// Perform the one-way transition to [`Phase::LockedDown`].
    ///
    /// Locking an already locked gate is an error: no legitimate caller
    /// does that.
    pub fn lock(&self) -> Result<(), PhaseError> {
        self.locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PhaseError::AlreadyLocked)?;
        info!("customizations locked down");
        Ok(())
    }

    /// Like [`Gate::check_can_customize`], but treats a violation as the
    /// programming error it is.
    ///
    /// # Panics
    ///
    /// Panics if the gate is locked down.
    #[track_caller]
    pub fn assert_can_customize(&self) {
        if let Err(e) = self.check_can_customize() {
            panic!("{e}");
        }
    }

    /// # Panics
    ///
    /// Panics if the gate is still customizing.
    #[track_caller]
    pub fn assert_locked_down(&self) {
        if let Err(e) = self.check_locked_down() {
            panic!("{e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_starts_customizing() {
        let gate = Gate::new();
        assert_eq!(gate.phase(), Phase::Customizing);
        assert!(gate.check_can_customize().is_ok());
        assert_eq!(gate.check_locked_down(), Err(PhaseError::NotLockedDown));
    }

    #[test]
    fn test_gate_lock_is_one_way() {
        let gate = Gate::new();
        gate.lock().unwrap();

        assert_eq!(gate.phase(), Phase::LockedDown);
        assert!(gate.check_locked_down().is_ok());
        assert_eq!(gate.check_can_customize(), Err(PhaseError::NotCustomizing));
        assert_eq!(gate.lock(), Err(PhaseError::AlreadyLocked));
        assert_eq!(gate.phase(), Phase::LockedDown);
    }

    #[test]
    #[should_panic(expected = "cannot add customizations after app start")]
    fn test_assert_can_customize_panics_after_lock() {
        let gate = Gate::new();
        gate.lock().unwrap();
        gate.assert_can_customize();
    }

    #[test]
    #[should_panic(expected = "cannot instantiate customizations until app start")]
    fn test_assert_locked_down_panics_before_lock() {
        Gate::new().assert_locked_down();
    }
}
