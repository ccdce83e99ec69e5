use conch_core::filter::{Column, Condition};
use rusqlite::types::Value as SqlValue;

/// A rendered `WHERE` clause over the `brief` table and its bound parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct WhereClause {
    pub(crate) sql: String,
    pub(crate) params: Vec<SqlValue>,
}

impl WhereClause {
    /// `None` renders to an empty clause that matches every row.
    pub(crate) fn from_condition(condition: Option<&Condition>) -> Self {
        let Some(condition) = condition else {
            return Self::default();
        };
        let mut params = Vec::new();
        let sql = format!("WHERE {}", render(condition, &mut params));
        Self { sql, params }
    }
}

fn column_sql(column: Column) -> String {
    format!("brief.{}", column.as_str())
}

fn render(condition: &Condition, params: &mut Vec<SqlValue>) -> String {
    match condition {
        Condition::All(conditions) if conditions.is_empty() => "1".to_string(),
        Condition::Any(conditions) if conditions.is_empty() => "0".to_string(),
        Condition::All(conditions) => join(conditions, " AND ", params),
        Condition::Any(conditions) => join(conditions, " OR ", params),
        Condition::Not(inner) => format!("NOT ({})", render(inner, params)),
        Condition::Equals { column, value } => {
            params.push(SqlValue::Text(value.clone()));
            format!("{} = ?", column_sql(*column))
        }
        Condition::HasToken { column, token } => {
            params.push(SqlValue::Text(token.clone()));
            format!(
                "instr(',' || {} || ',', ',' || ? || ',') > 0",
                column_sql(*column)
            )
        }
        Condition::TimeAtLeast(since) => {
            params.push(SqlValue::Integer(*since));
            "brief.time >= ?".to_string()
        }
    }
}

fn join(conditions: &[Condition], separator: &str, params: &mut Vec<SqlValue>) -> String {
    conditions
        .iter()
        .map(|condition| format!("({})", render(condition, params)))
        .collect::<Vec<_>>()
        .join(separator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conch_core::filter::{compile, Filter};

    #[test]
    fn empty_condition_renders_nothing() {
        assert_eq!(WhereClause::from_condition(None), WhereClause::default());
    }

    #[test]
    fn renders_groups_with_positional_params() {
        let filter = Filter {
            modes: ["m1", "m2"].iter().map(|m| m.to_string()).collect(),
            weapons: ["w1"].iter().map(|w| w.to_string()).collect(),
            inverted: true,
            ..Filter::default()
        };
        let condition = compile(Some(&filter), Some(42));
        let clause = WhereClause::from_condition(condition.as_ref());

        assert_eq!(
            clause.sql,
            "WHERE (NOT (((brief.mode = ?) OR (brief.mode = ?)) AND \
             ((instr(',' || brief.weapon || ',', ',' || ? || ',') > 0)))) AND (brief.time >= ?)"
        );
        assert_eq!(
            clause.params,
            vec![
                SqlValue::Text("m1".to_string()),
                SqlValue::Text("m2".to_string()),
                SqlValue::Text("w1".to_string()),
                SqlValue::Integer(42),
            ]
        );
    }
}
