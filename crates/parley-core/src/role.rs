//! Per-role behaviour table.
//!
//! Everything that differs between sender roles is looked up here instead of
//! being branched on at each call site.

use crate::model::SenderRole;

/// Static behaviour attached to a [`SenderRole`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleBehavior {
    /// Label shown when a message carries no sender name.
    pub default_label: &'static str,
    /// Whether messages of this role are ever sent optimistically, and so may
    /// confirm a local placeholder when they arrive from the server.
    pub reconciles_optimistic: bool,
    /// Whether a message of this role answers the customer.
    pub answers_customer: bool,
}

const CUSTOMER: RoleBehavior = RoleBehavior {
    default_label: "You",
    reconciles_optimistic: true,
    answers_customer: false,
};

const EMPLOYEE: RoleBehavior = RoleBehavior {
    default_label: "Support",
    reconciles_optimistic: true,
    answers_customer: true,
};

const AI: RoleBehavior = RoleBehavior {
    default_label: "Assistant",
    reconciles_optimistic: false,
    answers_customer: true,
};

const SYSTEM: RoleBehavior = RoleBehavior {
    default_label: "System",
    reconciles_optimistic: false,
    answers_customer: false,
};

impl SenderRole {
    /// Look up the behaviour for this role.
    #[must_use]
    pub const fn behavior(self) -> &'static RoleBehavior {
        match self {
            Self::Customer => &CUSTOMER,
            Self::Employee => &EMPLOYEE,
            Self::Ai => &AI,
            Self::System => &SYSTEM,
        }
    }

    /// Default display label.
    #[must_use]
    pub const fn default_label(self) -> &'static str {
        self.behavior().default_label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_human_roles_reconcile() {
        assert!(SenderRole::Customer.behavior().reconciles_optimistic);
        assert!(SenderRole::Employee.behavior().reconciles_optimistic);
        assert!(!SenderRole::Ai.behavior().reconciles_optimistic);
        assert!(!SenderRole::System.behavior().reconciles_optimistic);
    }

    #[test]
    fn replies_come_from_bot_or_staff() {
        assert!(SenderRole::Ai.behavior().answers_customer);
        assert!(SenderRole::Employee.behavior().answers_customer);
        assert!(!SenderRole::Customer.behavior().answers_customer);
    }

    #[test]
    fn labels() {
        assert_eq!(SenderRole::Ai.default_label(), "Assistant");
        assert_eq!(SenderRole::System.default_label(), "System");
    }
}
