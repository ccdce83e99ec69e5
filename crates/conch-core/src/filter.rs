use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Groups are ANDed together; values inside one group are ORed. An empty group
/// places no constraint on its dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub players: BTreeSet<String>,
    #[serde(default)]
    pub modes: BTreeSet<String>,
    #[serde(default)]
    pub rules: BTreeSet<String>,
    #[serde(default)]
    pub stages: BTreeSet<String>,
    #[serde(default)]
    pub weapons: BTreeSet<String>,
    #[serde(default)]
    pub inverted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Mode,
    Rule,
    Stage,
    Weapon,
    Players,
}

impl Column {
    pub fn as_str(&self) -> &'static str {
        match self {
            Column::Mode => "mode",
            Column::Rule => "rule",
            Column::Stage => "stage",
            Column::Weapon => "weapon",
            Column::Players => "players",
        }
    }

    /// Columns holding a comma-joined set rather than a single tag.
    pub fn is_token_set(&self) -> bool {
        matches!(self, Column::Weapon | Column::Players)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
    Equals { column: Column, value: String },
    HasToken { column: Column, token: String },
    TimeAtLeast(i64),
}

/// The filterable projection of one stored result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultColumns {
    pub time: i64,
    pub mode: String,
    pub rule: String,
    pub stage: String,
    pub weapon: Vec<String>,
    pub players: Vec<String>,
}

impl ResultColumns {
    fn single(&self, column: Column) -> Option<&str> {
        match column {
            Column::Mode => Some(&self.mode),
            Column::Rule => Some(&self.rule),
            Column::Stage => Some(&self.stage),
            Column::Weapon | Column::Players => None,
        }
    }

    fn tokens(&self, column: Column) -> &[String] {
        match column {
            Column::Weapon => &self.weapon,
            Column::Players => &self.players,
            Column::Mode | Column::Rule | Column::Stage => &[],
        }
    }
}

impl Condition {
    pub fn evaluate(&self, row: &ResultColumns) -> bool {
        match self {
            Condition::All(conditions) => conditions.iter().all(|c| c.evaluate(row)),
            Condition::Any(conditions) => conditions.iter().any(|c| c.evaluate(row)),
            Condition::Not(condition) => !condition.evaluate(row),
            Condition::Equals { column, value } => row.single(*column) == Some(value.as_str()),
            Condition::HasToken { column, token } => {
                row.tokens(*column).iter().any(|item| item == token)
            }
            Condition::TimeAtLeast(since) => row.time >= *since,
        }
    }
}

impl Filter {
    fn groups(&self) -> [(Column, &BTreeSet<String>); 5] {
        [
            (Column::Players, &self.players),
            (Column::Mode, &self.modes),
            (Column::Rule, &self.rules),
            (Column::Stage, &self.stages),
            (Column::Weapon, &self.weapons),
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.groups().iter().all(|(_, group)| group.is_empty())
    }

    pub fn matches(&self, row: &ResultColumns) -> bool {
        compile(Some(self), None)
            .map(|condition| condition.evaluate(row))
            .unwrap_or(true)
    }
}

pub fn equals(a: &Filter, b: &Filter) -> bool {
    a.inverted == b.inverted
        && a.groups()
            .iter()
            .zip(b.groups().iter())
            .all(|((_, left), (_, right))| left == right)
}

/// `None` stands for "no filter"; two absent filters are equal.
pub fn filters_equal(a: Option<&Filter>, b: Option<&Filter>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => equals(a, b),
        _ => false,
    }
}

/// True when every result matching `child` also matches `parent`.
pub fn includes(parent: &Filter, child: &Filter) -> bool {
    if parent.inverted != child.inverted {
        return false;
    }
    if parent.inverted {
        groups_include(child, parent)
    } else {
        groups_include(parent, child)
    }
}

fn groups_include(broad: &Filter, narrow: &Filter) -> bool {
    broad
        .groups()
        .iter()
        .zip(narrow.groups().iter())
        .all(|((_, wide), (_, slim))| {
            wide.is_empty() || (!slim.is_empty() && slim.is_subset(wide))
        })
}

/// Builds the condition for `filter`, optionally bounded below by `since`.
/// `None` means every row matches.
pub fn compile(filter: Option<&Filter>, since: Option<i64>) -> Option<Condition> {
    let mut clauses = Vec::new();

    if let Some(filter) = filter {
        let groups = filter
            .groups()
            .iter()
            .filter(|(_, group)| !group.is_empty())
            .map(|(column, group)| {
                Condition::Any(
                    group
                        .iter()
                        .map(|value| membership(*column, value))
                        .collect(),
                )
            })
            .collect::<Vec<_>>();

        if !groups.is_empty() {
            let conjunction = Condition::All(groups);
            if filter.inverted {
                clauses.push(Condition::Not(Box::new(conjunction)));
            } else {
                clauses.push(conjunction);
            }
        }
    }

    if let Some(since) = since {
        clauses.push(Condition::TimeAtLeast(since));
    }

    match clauses.len() {
        0 => None,
        1 => clauses.pop(),
        _ => Some(Condition::All(clauses)),
    }
}

/// Battle stage whose map is reused by the Big Run coop stage.
pub const BIG_RUN_BATTLE_STAGE: &str = "VnNTdGFnZS0xNg==";
pub const BIG_RUN_COOP_STAGE: &str = "Q29vcFN0YWdlLTEwMA==";

fn membership(column: Column, value: &str) -> Condition {
    if column == Column::Stage && value == BIG_RUN_BATTLE_STAGE {
        return Condition::Any(vec![
            Condition::Equals {
                column,
                value: value.to_string(),
            },
            Condition::Equals {
                column,
                value: BIG_RUN_COOP_STAGE.to_string(),
            },
        ]);
    }
    if column.is_token_set() {
        Condition::HasToken {
            column,
            token: value.to_string(),
        }
    } else {
        Condition::Equals {
            column,
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn row(mode: &str, rule: &str, weapons: &[&str], players: &[&str], time: i64) -> ResultColumns {
        ResultColumns {
            time,
            mode: mode.to_string(),
            rule: rule.to_string(),
            stage: "stage-1".to_string(),
            weapon: weapons.iter().map(|w| w.to_string()).collect(),
            players: players.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn sample_filters() -> Vec<Filter> {
        vec![
            Filter::default(),
            Filter {
                modes: set(&["regular"]),
                ..Filter::default()
            },
            Filter {
                modes: set(&["regular", "bankara"]),
                ..Filter::default()
            },
            Filter {
                modes: set(&["regular", "bankara"]),
                weapons: set(&["w1"]),
                ..Filter::default()
            },
            Filter {
                players: set(&["p1", "p2"]),
                rules: set(&["area"]),
                ..Filter::default()
            },
            Filter {
                modes: set(&["regular"]),
                inverted: true,
                ..Filter::default()
            },
            Filter {
                modes: set(&["regular", "bankara"]),
                inverted: true,
                ..Filter::default()
            },
        ]
    }

    fn sample_rows() -> Vec<ResultColumns> {
        vec![
            row("regular", "area", &["w1"], &["p1", "p9"], 10),
            row("bankara", "tower", &["w2"], &["p2"], 20),
            row("salmon_run", "REGULAR", &["w1", "w3"], &["p3"], 30),
            row("regular", "turf", &[], &[], 40),
        ]
    }

    #[test]
    fn equality_ignores_insertion_order() {
        let a = Filter {
            modes: ["b", "a"].iter().map(|v| v.to_string()).collect(),
            ..Filter::default()
        };
        let b = Filter {
            modes: set(&["a", "b"]),
            ..Filter::default()
        };
        assert!(equals(&a, &b));
        assert!(filters_equal(None, None));
        assert!(!filters_equal(Some(&a), None));
        assert!(!equals(
            &a,
            &Filter {
                inverted: true,
                ..b.clone()
            }
        ));
    }

    #[test]
    fn inclusion_algebra_holds_on_samples() {
        let filters = sample_filters();
        let rows = sample_rows();

        for a in &filters {
            assert!(includes(a, a), "reflexive: {a:?}");
            for b in &filters {
                if includes(a, b) && includes(b, a) {
                    assert!(equals(a, b), "antisymmetric: {a:?} {b:?}");
                }
                if includes(a, b) {
                    for row in &rows {
                        if b.matches(row) {
                            assert!(a.matches(row), "{a:?} should include {b:?} on {row:?}");
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn empty_child_group_is_not_included_by_constrained_parent() {
        let parent = Filter {
            modes: set(&["regular"]),
            ..Filter::default()
        };
        assert!(!includes(&parent, &Filter::default()));
        assert!(includes(&Filter::default(), &parent));
    }

    #[test]
    fn compile_ands_groups_and_ors_members() {
        let filter = Filter {
            modes: set(&["bankara", "regular"]),
            weapons: set(&["w1"]),
            ..Filter::default()
        };

        let condition = compile(Some(&filter), Some(15)).expect("condition");
        assert_eq!(
            condition,
            Condition::All(vec![
                Condition::All(vec![
                    Condition::Any(vec![
                        Condition::Equals {
                            column: Column::Mode,
                            value: "bankara".to_string()
                        },
                        Condition::Equals {
                            column: Column::Mode,
                            value: "regular".to_string()
                        },
                    ]),
                    Condition::Any(vec![Condition::HasToken {
                        column: Column::Weapon,
                        token: "w1".to_string()
                    }]),
                ]),
                Condition::TimeAtLeast(15),
            ])
        );

        let rows = sample_rows();
        let matched = rows
            .iter()
            .filter(|row| condition.evaluate(row))
            .map(|row| row.time)
            .collect::<Vec<_>>();
        assert!(matched.is_empty());

        let matched = rows
            .iter()
            .filter(|row| filter.matches(row))
            .map(|row| row.time)
            .collect::<Vec<_>>();
        assert_eq!(matched, vec![10]);
    }

    #[test]
    fn inverted_filter_negates_only_the_groups() {
        let filter = Filter {
            modes: set(&["regular"]),
            inverted: true,
            ..Filter::default()
        };
        let condition = compile(Some(&filter), Some(25)).expect("condition");
        let matched = sample_rows()
            .iter()
            .filter(|row| condition.evaluate(row))
            .map(|row| row.time)
            .collect::<Vec<_>>();
        assert_eq!(matched, vec![30]);
    }

    #[test]
    fn empty_filter_compiles_to_nothing_even_when_inverted() {
        assert_eq!(compile(None, None), None);
        assert_eq!(compile(Some(&Filter::default()), None), None);
        let inverted = Filter {
            inverted: true,
            ..Filter::default()
        };
        assert_eq!(compile(Some(&inverted), None), None);
        assert_eq!(
            compile(Some(&inverted), Some(5)),
            Some(Condition::TimeAtLeast(5))
        );
    }

    #[test]
    fn big_run_stage_matches_its_battle_counterpart() {
        let filter = Filter {
            stages: set(&[BIG_RUN_BATTLE_STAGE]),
            ..Filter::default()
        };
        let mut coop = row("salmon_run", "BIG_RUN", &[], &[], 1);
        coop.stage = BIG_RUN_COOP_STAGE.to_string();

        assert!(filter.matches(&coop));
        assert!(!filter.matches(&sample_rows()[0]));
    }

    #[test]
    fn player_group_matches_any_participant_token() {
        let filter = Filter {
            players: set(&["p9"]),
            ..Filter::default()
        };
        let rows = sample_rows();
        assert!(filter.matches(&rows[0]));
        assert!(!filter.matches(&rows[1]));
    }
}
