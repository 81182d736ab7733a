use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::CategorizationRule;
use crate::storage::Database;

/// What an upsert did to the rule list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleChange {
    Inserted,
    Updated { previous: String },
}

/// Ordered, pattern-keyed categorization rules.
///
/// Writers persist first and only then publish a fresh list, so readers never
/// observe an uncommitted rule. Snapshots are shared `Arc`s: a running
/// categorization keeps its copy while edits land.
pub struct RuleStore {
    db: Arc<Database>,
    rules: RwLock<Arc<Vec<CategorizationRule>>>,
}

impl RuleStore {
    pub fn load(db: Arc<Database>) -> Result<Self> {
        let rules = db.load_rules()?;
        debug!("Loaded {} categorization rules", rules.len());
        Ok(Self {
            db,
            rules: RwLock::new(Arc::new(rules)),
        })
    }

    /// Rules in insertion order.
    pub fn list(&self) -> Vec<CategorizationRule> {
        self.snapshot().as_ref().clone()
    }

    pub fn snapshot(&self) -> Arc<Vec<CategorizationRule>> {
        self.rules
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn upsert(&self, pattern: &str, category: &str) -> Result<RuleChange> {
        if pattern.trim().is_empty() {
            return Err(Error::validation("rule pattern must not be empty"));
        }
        if category.trim().is_empty() {
            return Err(Error::validation("rule category must not be empty"));
        }
        let rule = CategorizationRule::new(pattern, category);

        let mut guard = self.rules.write().unwrap_or_else(|p| p.into_inner());
        self.db.upsert_rule(&rule)?;

        let mut next = guard.as_ref().clone();
        let change = match next.iter_mut().find(|r| r.pattern == rule.pattern) {
            Some(existing) => {
                let previous = std::mem::replace(&mut existing.category, rule.category.clone());
                RuleChange::Updated { previous }
            }
            None => {
                next.push(rule);
                RuleChange::Inserted
            }
        };
        *guard = Arc::new(next);
        info!("Rule '{}' -> '{}' ({:?})", pattern, category, change);
        Ok(change)
    }

    /// Remove by exact pattern. Returns false when no such rule existed.
    pub fn remove(&self, pattern: &str) -> Result<bool> {
        let mut guard = self.rules.write().unwrap_or_else(|p| p.into_inner());
        if !guard.iter().any(|r| r.pattern == pattern) {
            debug!("Rule '{}' not present, nothing to remove", pattern);
            return Ok(false);
        }
        self.db.delete_rule(pattern)?;
        let next: Vec<CategorizationRule> =
            guard.iter().filter(|r| r.pattern != pattern).cloned().collect();
        *guard = Arc::new(next);
        info!("Rule '{}' removed", pattern);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RuleStore {
        RuleStore::load(Arc::new(Database::open_in_memory().unwrap())).unwrap()
    }

    #[test]
    fn test_upsert_twice_keeps_length_and_last_category() {
        let store = store();
        assert_eq!(store.upsert("invoice", "Finance").unwrap(), RuleChange::Inserted);
        assert_eq!(
            store.upsert("invoice", "Bills").unwrap(),
            RuleChange::Updated {
                previous: "Finance".to_string()
            }
        );
        assert_eq!(store.list(), vec![CategorizationRule::new("invoice", "Bills")]);

        store.upsert("invoice", "Bills").unwrap();
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn test_update_keeps_list_position() {
        let store = store();
        store.upsert("a", "A").unwrap();
        store.upsert("b", "B").unwrap();
        store.upsert("a", "A2").unwrap();
        let patterns: Vec<String> = store.list().into_iter().map(|r| r.pattern).collect();
        assert_eq!(patterns, vec!["a", "b"]);
    }

    #[test]
    fn test_blank_values_are_rejected() {
        let store = store();
        assert!(matches!(store.upsert("", "X"), Err(Error::Validation(_))));
        assert!(matches!(store.upsert("x", "  "), Err(Error::Validation(_))));
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let store = store();
        store.upsert("a", "A").unwrap();
        assert!(!store.remove("zzz").unwrap());
        assert!(store.remove("a").unwrap());
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_edits() {
        let store = store();
        store.upsert("a", "A").unwrap();
        let snapshot = store.snapshot();
        store.upsert("b", "B").unwrap();
        store.remove("a").unwrap();
        assert_eq!(snapshot.as_ref(), &vec![CategorizationRule::new("a", "A")]);
    }

    #[test]
    fn test_rules_survive_reload_in_order() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        {
            let store = RuleStore::load(db.clone()).unwrap();
            store.upsert("z", "Last").unwrap();
            store.upsert("m", "Middle").unwrap();
            store.upsert("a", "First").unwrap();
            store.remove("m").unwrap();
            store.upsert("z", "Changed").unwrap();
        }
        let reloaded = RuleStore::load(db).unwrap();
        assert_eq!(
            reloaded.list(),
            vec![
                CategorizationRule::new("z", "Changed"),
                CategorizationRule::new("a", "First"),
            ]
        );
    }
}
