//! Traffic routing models

use serde::{Deserialize, Serialize};

use crate::models::slot::Slot;

/// Fixed total every routed service's weights add up to
pub const TOTAL_WEIGHT: u32 = 100;

/// Traffic weights of the two slots of a service
///
/// `0/0` means the service has never been routed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRouting {
    pub primary: u32,
    pub secondary: u32,
}

impl ServiceRouting {
    pub fn new(primary: u32, secondary: u32) -> Self {
        Self { primary, secondary }
    }

    /// All traffic on one slot
    pub fn all_on(slot: Slot) -> Self {
        match slot {
            Slot::Primary => Self::new(TOTAL_WEIGHT, 0),
            Slot::Secondary => Self::new(0, TOTAL_WEIGHT),
        }
    }

    pub fn weight(&self, slot: Slot) -> u32 {
        match slot {
            Slot::Primary => self.primary,
            Slot::Secondary => self.secondary,
        }
    }

    pub fn is_routed(&self) -> bool {
        self.primary + self.secondary > 0
    }

    /// Slot with the strictly highest weight
    pub fn serving_slot(&self) -> Option<Slot> {
        if self.primary > self.secondary {
            Some(Slot::Primary)
        } else if self.secondary > self.primary {
            Some(Slot::Secondary)
        } else {
            None
        }
    }
}
