//! The rule catalog.
//!
//! The library holds every known rule.
//! The active set is an ordered list of ids referring into the library,
//! so editing a library rule is immediately seen through the active set.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    error::Error,
    rule::{Rule, RuleId, RuleStatus},
};

/// The outcome of importing a batch of rules.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportReport {
    /// Rules added to the library.
    pub accepted: usize,

    /// Elements which were not valid rules, or whose id was taken.
    pub rejected: usize,
}

/// The library and the active set.
#[derive(Debug, Default, Clone)]
pub struct RuleStore {
    library: Vec<Rule>,
    active: Vec<RuleId>,
}

fn has_non_empty_object(value: &Value, key: &str) -> bool {
    value
        .get(key)
        .and_then(Value::as_object)
        .map_or(false, |object| !object.is_empty())
}

impl RuleStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding the factory rules, all of them wired into the active set.
    pub fn seeded() -> Self {
        let library = Rule::factory_defaults();
        let active = library.iter().map(|rule| rule.id.clone()).collect();

        Self { library, active }
    }

    fn library_index(&self, id: &RuleId) -> Option<usize> {
        self.library.iter().position(|rule| &rule.id == id)
    }

    /// Look up a library rule.
    pub fn get(&self, id: &RuleId) -> Option<&Rule> {
        self.library.iter().find(|rule| &rule.id == id)
    }

    /// Check if the rule is in the active set.
    pub fn is_wired(&self, id: &RuleId) -> bool {
        self.active.contains(id)
    }

    /// Check if the rule is in the active set and its status is active.
    pub fn is_live(&self, id: &RuleId) -> bool {
        self.is_wired(id) && self.get(id).map_or(false, Rule::is_active)
    }

    /// Wire a rule into the active set, with status active.
    ///
    /// The library copy is inserted or replaced.
    /// Returns `false`, changing nothing, if the id is already in the active set.
    pub fn add(&mut self, mut rule: Rule) -> bool {
        if self.is_wired(&rule.id) {
            debug!(rule = %rule.id, "Rule already active, ignoring");
            return false;
        }

        rule.status = RuleStatus::Active;
        self.active.push(rule.id.clone());

        match self.library_index(&rule.id) {
            Some(index) => self.library[index] = rule,
            None => self.library.push(rule),
        }

        true
    }

    /// Replace a rule (matched by id) with a new revision.
    ///
    /// As with [`RuleStore::toggle`], a paused rule may not be resumed
    /// this way while the engine is stopped.
    pub fn update(&mut self, rule: Rule, engine_enabled: bool) -> Result<(), Error> {
        let index = self
            .library_index(&rule.id)
            .ok_or_else(|| Error::NoSuchRule(rule.id.clone()))?;

        if !engine_enabled && !self.library[index].is_active() && rule.is_active() {
            return Err(Error::EngineDisabled(rule.id));
        }

        debug!(rule = %rule.id, "Updating rule");
        self.library[index] = rule;

        Ok(())
    }

    /// Remove rules from both the library and the active set.
    ///
    /// Unknown ids are ignored.
    /// Returns the ids which were actually removed.
    pub fn remove(&mut self, ids: &[RuleId]) -> Vec<RuleId> {
        let removed = self
            .library
            .iter()
            .filter(|rule| ids.contains(&rule.id))
            .map(|rule| rule.id.clone())
            .collect::<Vec<_>>();

        self.library.retain(|rule| !ids.contains(&rule.id));
        self.active.retain(|id| !ids.contains(id));

        if removed.len() != ids.len() {
            debug!(
                requested = ids.len(),
                removed = removed.len(),
                "Some rules to remove did not exist"
            );
        }

        removed
    }

    /// Flip a rule between active and paused.
    ///
    /// While the engine is stopped, an active rule may be paused but
    /// a paused rule may not be activated.
    pub fn toggle(&mut self, id: &RuleId, engine_enabled: bool) -> Result<RuleStatus, Error> {
        let index = self
            .library_index(id)
            .ok_or_else(|| Error::NoSuchRule(id.clone()))?;

        let rule = &mut self.library[index];

        if !engine_enabled && !rule.is_active() {
            return Err(Error::EngineDisabled(id.clone()));
        }

        rule.status = rule.status.flipped();
        info!(rule = %rule.id, status = %rule.status, "Rule toggled");

        Ok(rule.status)
    }

    /// Import rules from a JSON array into the library (never the active set).
    ///
    /// Elements without non-empty `condition` and `action` objects, elements which
    /// otherwise do not deserialize, and elements reusing a known id are rejected.
    /// Elements without an id get a fresh one.
    pub fn import(&mut self, json: &str) -> Result<ImportReport, Error> {
        let values = serde_json::from_str::<Value>(json).map_err(|e| Error::BadJson {
            problem: e.to_string(),
        })?;

        match values {
            Value::Array(values) => Ok(self.import_values(values)),
            _ => Err(Error::BadJson {
                problem: "Expected an array of rules".into(),
            }),
        }
    }

    /// See [`RuleStore::import`].
    pub fn import_values(&mut self, values: Vec<Value>) -> ImportReport {
        let mut report = ImportReport::default();

        for mut value in values {
            if !has_non_empty_object(&value, "condition") || !has_non_empty_object(&value, "action")
            {
                report.rejected += 1;
                continue;
            }

            if let Some(object) = value.as_object_mut() {
                object
                    .entry("id")
                    .or_insert_with(|| Value::String(RuleId::generate().to_string()));
            }

            match serde_json::from_value::<Rule>(value) {
                Ok(rule) if self.get(&rule.id).is_some() => {
                    warn!(rule = %rule.id, "Imported rule id already known, rejecting");
                    report.rejected += 1;
                }
                Ok(rule) => {
                    self.library.push(rule);
                    report.accepted += 1;
                }
                Err(e) => {
                    warn!(%e, "Could not import rule");
                    report.rejected += 1;
                }
            }
        }

        info!(accepted = report.accepted, rejected = report.rejected, "Rules imported");

        report
    }

    /// The whole library as a pretty JSON array.
    pub fn export(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(&self.library).map_err(|e| Error::BadJson {
            problem: e.to_string(),
        })
    }

    /// The active set, in the order rules were added.
    pub fn list(&self) -> Vec<Rule> {
        self.active
            .iter()
            .filter_map(|id| self.get(id))
            .cloned()
            .collect()
    }

    /// Every known rule.
    pub fn library(&self) -> &[Rule] {
        &self.library
    }

    /// Library rules whose condition value, condition description or action value
    /// contain the term, case insensitively.
    pub fn search(&self, term: &str) -> Vec<Rule> {
        let term = term.to_lowercase();

        self.library
            .iter()
            .filter(|rule| {
                [
                    &rule.condition.value,
                    &rule.condition.description,
                    &rule.action.value,
                ]
                .iter()
                .any(|field| field.to_lowercase().contains(&term))
            })
            .cloned()
            .collect()
    }
}
