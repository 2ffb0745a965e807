// Caller-held page state: the current value of every control, plus the
// Toggle-All flag for each notification group.
//
// The executor never touches a session. Load results arrive as ControlUpdate
// events and the caller applies them here; Apply gets a snapshot of the values.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::registry::{self, Page};
use crate::template::{IndexTuple, ParameterTemplate};

/// One control: a template at one index tuple.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControlKey {
    pub template: &'static str,
    pub tuple: IndexTuple,
}

impl ControlKey {
    pub fn new(template: &ParameterTemplate, tuple: IndexTuple) -> Self {
        ControlKey {
            template: template.name,
            tuple,
        }
    }
}

pub type ControlValues = BTreeMap<ControlKey, i64>;

/// "Set this control to this value", produced by a Load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlUpdate {
    pub key: ControlKey,
    pub value: i64,
}

/// What the next Toggle-All on a group will do.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ToggleState {
    #[default]
    NextIsFalse,
    NextIsTrue,
}

impl ToggleState {
    pub fn target(self) -> i64 {
        match self {
            ToggleState::NextIsFalse => 0,
            ToggleState::NextIsTrue => 1,
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            ToggleState::NextIsFalse => ToggleState::NextIsTrue,
            ToggleState::NextIsTrue => ToggleState::NextIsFalse,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PageSession {
    page: Page,
    tuples: Vec<IndexTuple>,
    values: ControlValues,
    toggles: HashMap<&'static str, ToggleState>,
}

impl PageSession {
    /// Every template on `page` at every tuple, set to its default.
    pub fn new(page: Page, tuples: Vec<IndexTuple>) -> Self {
        let mut values = ControlValues::new();
        for tuple in &tuples {
            for template in registry::templates_for_page(page) {
                values.insert(ControlKey::new(template, *tuple), template.default);
            }
        }
        PageSession {
            page,
            tuples,
            values,
            toggles: HashMap::new(),
        }
    }

    /// A session over `tuples` holding no values yet. Load fills it from
    /// `ControlUpdate`s, so a control that was never read stays absent.
    pub fn empty(page: Page, tuples: Vec<IndexTuple>) -> Self {
        PageSession {
            page,
            tuples,
            values: ControlValues::new(),
            toggles: HashMap::new(),
        }
    }

    pub fn page(&self) -> Page {
        self.page
    }

    pub fn tuples(&self) -> &[IndexTuple] {
        &self.tuples
    }

    pub fn get(&self, key: &ControlKey) -> Option<i64> {
        self.values.get(key).copied()
    }

    pub fn values(&self) -> &ControlValues {
        &self.values
    }

    pub fn apply_update(&mut self, update: ControlUpdate) {
        self.values.insert(update.key, update.value);
    }

    /// Set `template` to `value` at every tuple in the session.
    pub fn set_all(&mut self, template: &ParameterTemplate, value: i64) {
        for tuple in &self.tuples {
            self.values.insert(ControlKey::new(template, *tuple), value);
        }
    }

    pub fn toggle_state(&self, group: &str) -> ToggleState {
        self.toggles.get(group).copied().unwrap_or_default()
    }

    /// Set every selector in `group` to the flag's target and flip the flag.
    /// Returns the value written.
    pub fn toggle_all(&mut self, group: &'static str) -> i64 {
        let state = self.toggle_state(group);
        let target = state.target();

        let members: Vec<&ParameterTemplate> = registry::templates_for_page(self.page)
            .iter()
            .filter(|t| t.domain.is_selector() && t.group == Some(group))
            .collect();
        for template in members {
            self.set_all(template, target);
        }

        self.toggles.insert(group, state.flipped());
        target
    }

    pub fn to_snapshot(&self) -> Snapshot {
        let controls = self
            .tuples
            .iter()
            .flat_map(|tuple| {
                registry::templates_for_page(self.page).iter().filter_map(move |t| {
                    self.get(&ControlKey::new(t, *tuple)).map(|value| SnapshotEntry {
                        name: t.name.to_string(),
                        tuple: *tuple,
                        value,
                    })
                })
            })
            .collect();
        Snapshot {
            page: self.page,
            controls,
        }
    }

    /// Rebuild a session from a snapshot. Every entry must name a template on
    /// the snapshot's page and carry an in-domain value. Controls the snapshot
    /// does not list stay absent.
    pub fn from_snapshot(snapshot: &Snapshot) -> Result<Self> {
        let mut tuples = Vec::new();
        for entry in &snapshot.controls {
            if !tuples.contains(&entry.tuple) {
                tuples.push(entry.tuple);
            }
        }

        let mut session = PageSession::empty(snapshot.page, tuples);
        for entry in &snapshot.controls {
            let template = registry::templates_for_page(snapshot.page)
                .iter()
                .find(|t| t.name == entry.name)
                .with_context(|| {
                    format!("Snapshot names unknown parameter '{}' on page {}", entry.name, snapshot.page)
                })?;
            if let Err(e) = template.domain.check(entry.value) {
                bail!("Snapshot value for '{}': {}", entry.name, e);
            }
            session.values.insert(ControlKey::new(template, entry.tuple), entry.value);
        }
        Ok(session)
    }
}

/// On-disk form of a session, written by `load --save` and read by `apply --from`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub page: Page,
    pub controls: Vec<SnapshotEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub name: String,
    pub tuple: IndexTuple,
    pub value: i64,
}

pub fn save_snapshot(path: &Path, session: &PageSession) -> Result<()> {
    let json = serde_json::to_string_pretty(&session.to_snapshot())?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn load_snapshot(path: &Path) -> Result<PageSession> {
    let data =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let snapshot: Snapshot =
        serde_json::from_str(&data).with_context(|| format!("{} is not a snapshot", path.display()))?;
    PageSession::from_snapshot(&snapshot)
}
