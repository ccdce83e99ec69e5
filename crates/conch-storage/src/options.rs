use conch_core::codec::{decode64_index, index_order};
use conch_core::filter::BIG_RUN_COOP_STAGE;
use conch_core::record::{split_tokens, COOP_MODE};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Distinct values present in the store, each in display order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterOptions {
    pub modes: Vec<String>,
    pub rules: Vec<String>,
    pub stages: Vec<String>,
    pub weapons: Vec<String>,
}

const ANARCHY_OPEN_INDEX: i64 = 51;
const COOP_RULES: [&str; 3] = ["REGULAR", "BIG_RUN", "TEAM_CONTEST"];

impl FilterOptions {
    pub(crate) fn from_distinct(
        modes: Vec<String>,
        rules: Vec<String>,
        stages: Vec<String>,
        weapon_columns: Vec<String>,
    ) -> Self {
        let mut modes = non_empty(modes);
        modes.sort_by(|a, b| mode_order(a, b));

        let mut rules = non_empty(rules);
        rules.sort_by(|a, b| rule_order(a, b));

        let mut stages = non_empty(stages)
            .into_iter()
            .filter(|stage| stage != BIG_RUN_COOP_STAGE)
            .collect::<Vec<_>>();
        stages.sort_by(|a, b| stage_order(a, b));

        let weapons = weapon_columns
            .iter()
            .flat_map(|column| split_tokens(column))
            .collect::<BTreeSet<_>>();
        let mut weapons = weapons.into_iter().collect::<Vec<_>>();
        weapons.sort_by(|a, b| index_order(a, b));

        Self {
            modes,
            rules,
            stages,
            weapons,
        }
    }
}

fn non_empty(values: Vec<String>) -> Vec<String> {
    values.into_iter().filter(|value| !value.is_empty()).collect()
}

/// Co-op last; anarchy open sits between anarchy series (2) and X (3).
fn mode_order(a: &str, b: &str) -> Ordering {
    let key = |mode: &str| {
        if mode == COOP_MODE {
            return (1, 0);
        }
        match decode64_index(mode) {
            ANARCHY_OPEN_INDEX => (0, 5),
            index => (0, index * 2),
        }
    };
    key(a).cmp(&key(b)).then_with(|| a.cmp(b))
}

/// Battle rules by index, then co-op rules in schedule order, then the rest.
fn rule_order(a: &str, b: &str) -> Ordering {
    let key = |rule: &str| {
        if rule.starts_with('V') {
            return (0, decode64_index(rule));
        }
        match COOP_RULES.iter().position(|known| *known == rule) {
            Some(position) => (1, position as i64),
            None => (2, 0),
        }
    };
    key(a).cmp(&key(b)).then_with(|| a.cmp(b))
}

/// Battle stages before co-op stages, each by index.
fn stage_order(a: &str, b: &str) -> Ordering {
    let group = |stage: &str| u8::from(!stage.starts_with('V'));
    group(a)
        .cmp(&group(b))
        .then_with(|| index_order(a, b))
}
