//! The closed set of application entities the engine knows how to back up.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named, readable application entity.
///
/// Names render and parse in PascalCase (`"User"`, `"ProcurementMonitor"`),
/// matching the table names used in backup configs.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entity {
    User,
    Company,
    Procurement,
    ProcurementMonitor,
    Document,
    LegalConsultation,
    Notification,
    EmailTemplate,
    Subscription,
    AffiliateReferral,
}

impl Entity {
    /// Built-in full entity set, used when a config lists no tables.
    ///
    /// Ordered so that parents come before the rows that reference them.
    pub const ALL: [Entity; 10] = [
        Entity::User,
        Entity::Company,
        Entity::Procurement,
        Entity::ProcurementMonitor,
        Entity::Document,
        Entity::LegalConsultation,
        Entity::Notification,
        Entity::EmailTemplate,
        Entity::Subscription,
        Entity::AffiliateReferral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::User => "User",
            Entity::Company => "Company",
            Entity::Procurement => "Procurement",
            Entity::ProcurementMonitor => "ProcurementMonitor",
            Entity::Document => "Document",
            Entity::LegalConsultation => "LegalConsultation",
            Entity::Notification => "Notification",
            Entity::EmailTemplate => "EmailTemplate",
            Entity::Subscription => "Subscription",
            Entity::AffiliateReferral => "AffiliateReferral",
        }
    }

    /// Resolves the entity list for a config: the configured tables in
    /// their given order, or [`Entity::ALL`] when none are configured.
    pub fn resolve(tables: &[Entity]) -> Vec<Entity> {
        if tables.is_empty() {
            Entity::ALL.to_vec()
        } else {
            tables.to_vec()
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a table name is not one of the supported entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEntity(pub String);

impl fmt::Display for UnknownEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown entity '{}'", self.0)
    }
}

impl std::error::Error for UnknownEntity {}

impl FromStr for Entity {
    type Err = UnknownEntity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Entity::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| UnknownEntity(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tables_resolve_to_full_set() {
        assert_eq!(Entity::resolve(&[]), Entity::ALL.to_vec());
    }

    #[test]
    fn configured_tables_keep_caller_order() {
        let tables = [Entity::Company, Entity::User];
        assert_eq!(Entity::resolve(&tables), vec![Entity::Company, Entity::User]);
    }

    #[test]
    fn parses_pascal_case_names() {
        assert_eq!("ProcurementMonitor".parse::<Entity>(), Ok(Entity::ProcurementMonitor));
        assert_eq!(
            "users".parse::<Entity>(),
            Err(UnknownEntity("users".to_string()))
        );
    }

    #[test]
    fn serde_uses_display_names() {
        let json = serde_json::to_string(&Entity::LegalConsultation).unwrap();
        assert_eq!(json, "\"LegalConsultation\"");
    }
}
