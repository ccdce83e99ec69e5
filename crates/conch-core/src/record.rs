use crate::brief::{derive_brief, Brief};
use crate::codec::image_hash;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Mode tag stored for every co-op result.
pub const COOP_MODE: &str = "salmon_run";

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("payload has no `{0}` envelope")]
    MissingEnvelope(&'static str),
    #[error("missing or invalid field `{0}`")]
    MissingField(String),
    #[error("invalid playedTime `{value}`: {source}")]
    InvalidTime {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Battle,
    Coop,
}

impl ResultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultKind::Battle => "battle",
            ResultKind::Coop => "coop",
        }
    }

    pub fn envelope_key(&self) -> &'static str {
        match self {
            ResultKind::Battle => "vsHistoryDetail",
            ResultKind::Coop => "coopHistoryDetail",
        }
    }

    pub fn of_mode(mode: &str) -> Self {
        if mode == COOP_MODE {
            ResultKind::Coop
        } else {
            ResultKind::Battle
        }
    }

    /// Wraps a bare detail object in this kind's envelope.
    pub fn wrap(&self, detail: Value) -> Value {
        let mut envelope = Map::new();
        envelope.insert(self.envelope_key().to_string(), detail);
        Value::Object(envelope)
    }
}

/// A normalized result ready to be written to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewResult {
    pub id: String,
    pub time: i64,
    pub mode: String,
    pub rule: String,
    pub stage: String,
    pub weapon: Vec<String>,
    pub players: Vec<String>,
    pub brief: Brief,
    pub detail: String,
}

impl NewResult {
    pub fn from_payload(kind: ResultKind, payload: &Value) -> Result<Self, RecordError> {
        match kind {
            ResultKind::Battle => Self::from_battle(payload),
            ResultKind::Coop => Self::from_coop(payload),
        }
    }

    pub fn from_battle(payload: &Value) -> Result<Self, RecordError> {
        let detail = envelope(ResultKind::Battle, payload)?;
        let self_player = battle_self_player(detail)?;

        Ok(Self {
            id: canonical_id(ResultKind::Battle, payload)?,
            time: played_time(detail)?,
            mode: require_str(detail, &["vsMode", "id"])?.to_string(),
            rule: require_str(detail, &["vsRule", "id"])?.to_string(),
            stage: require_str(detail, &["vsStage", "id"])?.to_string(),
            weapon: vec![require_str(self_player, &["weapon", "id"])?.to_string()],
            players: participants(ResultKind::Battle, detail)?,
            brief: derive_brief(ResultKind::Battle, payload)?,
            detail: serde_json::to_string(payload)?,
        })
    }

    pub fn from_coop(payload: &Value) -> Result<Self, RecordError> {
        let detail = envelope(ResultKind::Coop, payload)?;

        Ok(Self {
            id: canonical_id(ResultKind::Coop, payload)?,
            time: played_time(detail)?,
            mode: COOP_MODE.to_string(),
            rule: require_str(detail, &["rule"])?.to_string(),
            stage: require_str(detail, &["coopStage", "id"])?.to_string(),
            weapon: coop_weapons(detail)?,
            players: participants(ResultKind::Coop, detail)?,
            brief: derive_brief(ResultKind::Coop, payload)?,
            detail: serde_json::to_string(payload)?,
        })
    }

    pub fn kind(&self) -> ResultKind {
        ResultKind::of_mode(&self.mode)
    }

    pub fn weapon_column(&self) -> String {
        join_tokens(&self.weapon)
    }

    pub fn players_column(&self) -> String {
        join_tokens(&self.players)
    }

    pub fn brief_json(&self) -> Result<String, RecordError> {
        Ok(serde_json::to_string(&self.brief)?)
    }
}

/// Comma-joins tokens, dropping empty entries.
pub fn join_tokens(tokens: &[String]) -> String {
    tokens
        .iter()
        .filter(|token| !token.is_empty())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

pub fn split_tokens(column: &str) -> Vec<String> {
    column
        .split(',')
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// The id carried by the payload itself, if any.
pub fn native_id(kind: ResultKind, payload: &Value) -> Option<&str> {
    payload
        .get(kind.envelope_key())
        .and_then(|detail| detail.get("id"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

/// Native id when present, otherwise [`deterministic_id`].
pub fn canonical_id(kind: ResultKind, payload: &Value) -> Result<String, RecordError> {
    match native_id(kind, payload) {
        Some(id) => Ok(id.to_string()),
        None => deterministic_id(kind, payload),
    }
}

/// `sha256("<kind>|<playedTime>|<sorted players>")` as lowercase hex.
pub fn deterministic_id(kind: ResultKind, payload: &Value) -> Result<String, RecordError> {
    let detail = envelope(kind, payload)?;
    let played = require_str(detail, &["playedTime"])?;
    let mut players = participants(kind, detail)?;
    players.sort();

    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(played.as_bytes());
    hasher.update(b"|");
    hasher.update(players.join(",").as_bytes());
    let digest = hasher.finalize();

    Ok(digest.iter().map(|byte| format!("{byte:02x}")).collect())
}

pub(crate) fn envelope(kind: ResultKind, payload: &Value) -> Result<&Value, RecordError> {
    payload
        .get(kind.envelope_key())
        .filter(|detail| detail.is_object())
        .ok_or(RecordError::MissingEnvelope(kind.envelope_key()))
}

pub(crate) fn played_time(detail: &Value) -> Result<i64, RecordError> {
    let value = require_str(detail, &["playedTime"])?;
    DateTime::parse_from_rfc3339(value)
        .map(|time| time.timestamp_millis())
        .map_err(|source| RecordError::InvalidTime {
            value: value.to_string(),
            source,
        })
}

pub(crate) fn battle_self_player(detail: &Value) -> Result<&Value, RecordError> {
    require_array(detail, &["myTeam", "players"])?
        .iter()
        .find(|player| player.get("isMyself").and_then(Value::as_bool) == Some(true))
        .ok_or_else(|| RecordError::MissingField("myTeam.players[isMyself]".to_string()))
}

fn coop_weapons(detail: &Value) -> Result<Vec<String>, RecordError> {
    require_array(detail, &["myResult", "weapons"])?
        .iter()
        .map(|weapon| Ok(image_hash(require_str(weapon, &["image", "url"])?).to_string()))
        .collect()
}

fn participants(kind: ResultKind, detail: &Value) -> Result<Vec<String>, RecordError> {
    let mut players = Vec::new();
    match kind {
        ResultKind::Battle => {
            for player in require_array(detail, &["myTeam", "players"])? {
                players.push(require_str(player, &["id"])?.to_string());
            }
            for team in require_array(detail, &["otherTeams"])? {
                for player in require_array(team, &["players"])? {
                    players.push(require_str(player, &["id"])?.to_string());
                }
            }
        }
        ResultKind::Coop => {
            for member in require_array(detail, &["memberResults"])? {
                players.push(require_str(member, &["player", "id"])?.to_string());
            }
            players.push(require_str(detail, &["myResult", "player", "id"])?.to_string());
        }
    }
    Ok(players)
}

/// Follows `path`, treating JSON `null` as absent.
pub(crate) fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(value, |node, key| node.get(*key))
        .filter(|found| !found.is_null())
}

fn missing(path: &[&str]) -> RecordError {
    RecordError::MissingField(path.join("."))
}

pub(crate) fn require_str<'a>(value: &'a Value, path: &[&str]) -> Result<&'a str, RecordError> {
    lookup(value, path)
        .and_then(Value::as_str)
        .ok_or_else(|| missing(path))
}

pub(crate) fn require_array<'a>(
    value: &'a Value,
    path: &[&str],
) -> Result<&'a Vec<Value>, RecordError> {
    lookup(value, path)
        .and_then(Value::as_array)
        .ok_or_else(|| missing(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{BattleFixture, CoopFixture};
    use serde_json::json;

    #[test]
    fn normalizes_battle_payload() {
        let fixture = BattleFixture::new("battle-1", "2023-03-01T12:00:00Z");
        let result = NewResult::from_battle(&fixture.to_json()).expect("battle");

        assert_eq!(result.id, "battle-1");
        assert_eq!(result.time, 1_677_672_000_000);
        assert_eq!(result.mode, fixture.mode);
        assert_eq!(result.rule, fixture.rule);
        assert_eq!(result.stage, fixture.stage);
        assert_eq!(result.weapon, vec![fixture.weapon.clone()]);
        assert_eq!(result.players, fixture.players);
        assert_eq!(result.kind(), ResultKind::Battle);

        let detail: Value = serde_json::from_str(&result.detail).expect("detail json");
        assert_eq!(detail, fixture.to_json());
    }

    #[test]
    fn normalizes_coop_payload() {
        let fixture = CoopFixture::new("coop-1", "2023-03-02T00:00:00+09:00");
        let result = NewResult::from_coop(&fixture.to_json()).expect("coop");

        assert_eq!(result.mode, COOP_MODE);
        assert_eq!(result.time, 1_677_682_800_000);
        assert_eq!(result.rule, "REGULAR");
        assert_eq!(result.weapon, fixture.weapons);
        assert_eq!(result.weapon_column(), fixture.weapons.join(","));
        // Members first, then the local player.
        let mut expected = fixture.players[1..].to_vec();
        expected.push(fixture.players[0].clone());
        assert_eq!(result.players, expected);
        assert_eq!(result.kind(), ResultKind::Coop);
    }

    #[test]
    fn missing_id_falls_back_to_deterministic_id() {
        let mut payload = BattleFixture::new("", "2023-03-01T12:00:00Z").to_json();
        let first = NewResult::from_battle(&payload).expect("battle");
        assert_eq!(first.id.len(), 64);

        // Player order does not affect the id.
        let players = payload["vsHistoryDetail"]["otherTeams"][0]["players"]
            .as_array_mut()
            .expect("players");
        players.reverse();
        assert_eq!(
            deterministic_id(ResultKind::Battle, &payload).expect("id"),
            first.id
        );
        assert_ne!(
            deterministic_id(ResultKind::Coop, &ResultKind::Coop.wrap(json!({
                "playedTime": "2023-03-01T12:00:00Z",
                "memberResults": [],
                "myResult": {"player": {"id": "p-self"}},
            })))
            .expect("coop id"),
            first.id
        );
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(matches!(
            NewResult::from_battle(&json!({"coopHistoryDetail": {}})),
            Err(RecordError::MissingEnvelope("vsHistoryDetail"))
        ));

        let mut payload = BattleFixture::new("battle-2", "2023-03-01T12:00:00Z").to_json();
        payload["vsHistoryDetail"]["playedTime"] = json!("yesterday");
        assert!(matches!(
            NewResult::from_battle(&payload),
            Err(RecordError::InvalidTime { .. })
        ));

        let mut payload = CoopFixture::new("coop-2", "2023-03-01T12:00:00Z").to_json();
        payload["coopHistoryDetail"]["coopStage"] = Value::Null;
        let err = NewResult::from_coop(&payload).expect_err("missing stage");
        assert_eq!(err.to_string(), "missing or invalid field `coopStage.id`");
    }

    #[test]
    fn token_columns_skip_empty_entries() {
        let tokens = vec!["a".to_string(), String::new(), "b".to_string()];
        assert_eq!(join_tokens(&tokens), "a,b");
        assert_eq!(split_tokens("a,,b"), vec!["a", "b"]);
        assert!(split_tokens("").is_empty());
    }
}
