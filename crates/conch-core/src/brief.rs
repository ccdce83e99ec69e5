//! Compact summaries stored next to each result for listing and statistics.
//! A brief is always re-derivable from the stored detail.

use crate::codec::{decode64_index, image_hash};
use crate::record::{
    battle_self_player, canonical_id, envelope, lookup, played_time, require_array,
    require_str, RecordError, ResultKind,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Version of the derivation below. Version 2 added the coop king salmonid
/// and wave summaries.
pub const BRIEF_VERSION: u32 = 2;

const EVENT_FREE_WAVE: &str = "-";
const KING_SALMONID_PREFIX: &str = "Q29vcEVu";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Brief {
    Battle(BattleBrief),
    Coop(CoopBrief),
}

impl Brief {
    pub fn kind(&self) -> ResultKind {
        match self {
            Brief::Battle(_) => ResultKind::Battle,
            Brief::Coop(_) => ResultKind::Coop,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Brief::Battle(brief) => &brief.id,
            Brief::Coop(brief) => &brief.id,
        }
    }

    pub fn time(&self) -> i64 {
        match self {
            Brief::Battle(brief) => brief.time,
            Brief::Coop(brief) => brief.time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattlePlayerBrief {
    #[serde(rename = "self")]
    pub is_self: bool,
    pub weapon: String,
    pub sub_weapon: String,
    pub special_weapon: String,
    pub turf: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assist: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub death: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ultra_signal: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleBrief {
    pub id: String,
    pub result: String,
    pub time: i64,
    pub duration: i64,
    pub mode: String,
    pub rule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,
    pub stage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dragon: Option<String>,
    pub my_team: Vec<BattlePlayerBrief>,
    pub other_teams: Vec<Vec<BattlePlayerBrief>>,
}

impl BattleBrief {
    pub fn self_player(&self) -> Option<&BattlePlayerBrief> {
        self.my_team.iter().find(|player| player.is_self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoopPlayerBrief {
    pub weapons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_weapon: Option<String>,
    pub defeat: i64,
    pub golden: i64,
    pub assist: i64,
    pub power: i64,
    pub rescue: i64,
    pub rescued: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveLevel {
    pub id: i64,
    pub appear: u32,
    pub clear: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveBrief {
    pub id: String,
    pub levels: Vec<WaveLevel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BossBrief {
    pub id: String,
    pub appear: i64,
    pub defeat: i64,
    pub defeat_team: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KingBrief {
    pub id: String,
    pub defeat: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeBrief {
    pub id: String,
    pub point: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scales {
    pub gold: i64,
    pub silver: i64,
    pub bronze: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoopBrief {
    pub id: String,
    pub result: i64,
    pub time: i64,
    pub private: bool,
    pub rule: String,
    pub stage: String,
    pub supplied_weapons: Vec<String>,
    pub hazard_level: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<GradeBrief>,
    pub players: Vec<CoopPlayerBrief>,
    #[serde(default)]
    pub waves: Vec<WaveBrief>,
    pub bosses: Vec<BossBrief>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub king: Option<KingBrief>,
    #[serde(default)]
    pub kings: Vec<KingBrief>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scales: Option<Scales>,
}

pub fn derive_brief(kind: ResultKind, payload: &Value) -> Result<Brief, RecordError> {
    match kind {
        ResultKind::Battle => battle_brief(payload).map(Brief::Battle),
        ResultKind::Coop => coop_brief(payload).map(Brief::Coop),
    }
}

fn opt_i64(value: &Value, path: &[&str]) -> Option<i64> {
    lookup(value, path).and_then(Value::as_i64)
}

fn opt_f64(value: &Value, path: &[&str]) -> Option<f64> {
    lookup(value, path).and_then(Value::as_f64)
}

fn opt_string(value: &Value, path: &[&str]) -> Option<String> {
    lookup(value, path)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn flag(value: &Value, path: &[&str]) -> bool {
    lookup(value, path)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn battle_brief(payload: &Value) -> Result<BattleBrief, RecordError> {
    let detail = envelope(ResultKind::Battle, payload)?;
    // A battle without the local player cannot be attributed.
    battle_self_player(detail)?;

    let my_team = require_array(detail, &["myTeam", "players"])?
        .iter()
        .map(battle_player)
        .collect::<Result<Vec<_>, _>>()?;
    let other_teams = require_array(detail, &["otherTeams"])?
        .iter()
        .map(|team| {
            require_array(team, &["players"])?
                .iter()
                .map(battle_player)
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(BattleBrief {
        id: canonical_id(ResultKind::Battle, payload)?,
        result: require_str(detail, &["judgement"])?.to_string(),
        time: played_time(detail)?,
        duration: opt_i64(detail, &["duration"]).unwrap_or(0),
        mode: require_str(detail, &["vsMode", "id"])?.to_string(),
        rule: require_str(detail, &["vsRule", "id"])?.to_string(),
        challenge: opt_string(detail, &["leagueMatch", "leagueMatchEvent", "id"]),
        stage: require_str(detail, &["vsStage", "id"])?.to_string(),
        power: vs_power(detail),
        dragon: opt_string(detail, &["festMatch", "dragonMatchType"]),
        my_team,
        other_teams,
    })
}

fn battle_player(player: &Value) -> Result<BattlePlayerBrief, RecordError> {
    Ok(BattlePlayerBrief {
        is_self: flag(player, &["isMyself"]),
        weapon: require_str(player, &["weapon", "id"])?.to_string(),
        sub_weapon: opt_string(player, &["weapon", "subWeapon", "id"]).unwrap_or_default(),
        special_weapon: opt_string(player, &["weapon", "specialWeapon", "id"])
            .unwrap_or_default(),
        turf: opt_i64(player, &["paint"]).unwrap_or(0),
        kill: opt_i64(player, &["result", "kill"]),
        assist: opt_i64(player, &["result", "assist"]),
        death: opt_i64(player, &["result", "death"]),
        special: opt_i64(player, &["result", "special"]),
        ultra_signal: opt_i64(player, &["result", "noroshiTry"]),
    })
}

/// Anarchy, X, challenge, then splatfest power, whichever is present first.
fn vs_power(detail: &Value) -> Option<f64> {
    opt_f64(detail, &["bankaraMatch", "bankaraPower", "power"])
        .or_else(|| opt_f64(detail, &["xMatch", "lastXPower"]))
        .or_else(|| opt_f64(detail, &["leagueMatch", "myLeaguePower"]))
        .or_else(|| opt_f64(detail, &["festMatch", "myFestPower"]))
}

fn coop_brief(payload: &Value) -> Result<CoopBrief, RecordError> {
    let detail = envelope(ResultKind::Coop, payload)?;
    let rule = require_str(detail, &["rule"])?.to_string();
    let result_wave = opt_i64(detail, &["resultWave"]).unwrap_or(0);
    let king = lookup(detail, &["bossResult"]).map(king_brief).transpose()?;

    let mut players = vec![coop_player(lookup(detail, &["myResult"]).unwrap_or(&Value::Null))?];
    for member in require_array(detail, &["memberResults"])? {
        players.push(coop_player(member)?);
    }

    // `bossResults` already lists every King of a multi-King job.
    let kings = match lookup(detail, &["bossResults"]).and_then(Value::as_array) {
        Some(bosses) => bosses.iter().map(king_brief).collect::<Result<Vec<_>, _>>()?,
        None => king.iter().cloned().collect(),
    };

    let grade = match lookup(detail, &["afterGrade", "id"]).and_then(Value::as_str) {
        Some(id) => Some(GradeBrief {
            id: id.to_string(),
            point: opt_i64(detail, &["afterGradePoint"]).unwrap_or(0),
        }),
        None => None,
    };

    let scales = lookup(detail, &["scale"]).map(|scale| Scales {
        gold: opt_i64(scale, &["gold"]).unwrap_or(0),
        silver: opt_i64(scale, &["silver"]).unwrap_or(0),
        bronze: opt_i64(scale, &["bronze"]).unwrap_or(0),
    });

    Ok(CoopBrief {
        id: canonical_id(ResultKind::Coop, payload)?,
        result: result_wave,
        time: played_time(detail)?,
        private: lookup(detail, &["jobPoint"]).is_none(),
        stage: require_str(detail, &["coopStage", "id"])?.to_string(),
        supplied_weapons: image_hashes(lookup(detail, &["weapons"]))?,
        hazard_level: opt_f64(detail, &["dangerRate"]).unwrap_or(0.0),
        grade,
        players,
        waves: coop_waves(detail, &rule, result_wave, king.as_ref())?,
        bosses: coop_bosses(detail)?,
        king,
        kings,
        scales,
        rule,
    })
}

fn coop_player(member: &Value) -> Result<CoopPlayerBrief, RecordError> {
    Ok(CoopPlayerBrief {
        weapons: image_hashes(lookup(member, &["weapons"]))?,
        special_weapon: lookup(member, &["specialWeapon", "image", "url"])
            .and_then(Value::as_str)
            .map(|url| image_hash(url).to_string()),
        defeat: opt_i64(member, &["defeatEnemyCount"]).unwrap_or(0),
        golden: opt_i64(member, &["goldenDeliverCount"]).unwrap_or(0),
        assist: opt_i64(member, &["goldenAssistCount"]).unwrap_or(0),
        power: opt_i64(member, &["deliverCount"]).unwrap_or(0),
        rescue: opt_i64(member, &["rescueCount"]).unwrap_or(0),
        rescued: opt_i64(member, &["rescuedCount"]).unwrap_or(0),
    })
}

fn image_hashes(weapons: Option<&Value>) -> Result<Vec<String>, RecordError> {
    let Some(weapons) = weapons.and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    weapons
        .iter()
        .map(|weapon| Ok(image_hash(require_str(weapon, &["image", "url"])?).to_string()))
        .collect()
}

fn king_brief(result: &Value) -> Result<KingBrief, RecordError> {
    Ok(KingBrief {
        id: require_str(result, &["boss", "id"])?.to_string(),
        defeat: flag(result, &["hasDefeatBoss"]),
    })
}

/// Groups waves by event (or king salmonid for the extra wave) and water level.
fn coop_waves(
    detail: &Value,
    rule: &str,
    result_wave: i64,
    king: Option<&KingBrief>,
) -> Result<Vec<WaveBrief>, RecordError> {
    let mut waves: Vec<WaveBrief> = Vec::new();
    let extra_wave_rule = matches!(rule, "REGULAR" | "BIG_RUN");

    for (index, wave) in require_array(detail, &["waveResults"])?.iter().enumerate() {
        let level = opt_i64(wave, &["waterLevel"]).unwrap_or(0);
        let (id, cleared) = match king {
            Some(king) if extra_wave_rule && index >= 3 => (king.id.clone(), king.defeat),
            _ => (
                opt_string(wave, &["eventWave", "id"])
                    .unwrap_or_else(|| EVENT_FREE_WAVE.to_string()),
                result_wave == 0 || result_wave > index as i64 + 1,
            ),
        };

        let position = match waves.iter().position(|wave| wave.id == id) {
            Some(position) => position,
            None => {
                waves.push(WaveBrief {
                    id,
                    levels: Vec::new(),
                });
                waves.len() - 1
            }
        };
        let levels = &mut waves[position].levels;
        let slot = match levels.iter().position(|entry| entry.id == level) {
            Some(slot) => slot,
            None => {
                levels.push(WaveLevel {
                    id: level,
                    appear: 0,
                    clear: 0,
                });
                levels.len() - 1
            }
        };
        levels[slot].appear += 1;
        if cleared {
            levels[slot].clear += 1;
        }
    }

    for wave in &mut waves {
        wave.levels.sort_by_key(|level| level.id);
    }
    waves.sort_by(|a, b| wave_order(&a.id, &b.id));
    Ok(waves)
}

/// Event-free waves first, king salmonids last, events by index between.
fn wave_order(a: &str, b: &str) -> Ordering {
    let rank = |id: &str| match id {
        EVENT_FREE_WAVE => 0,
        _ if id.starts_with(KING_SALMONID_PREFIX) => 2,
        _ => 1,
    };
    rank(a)
        .cmp(&rank(b))
        .then_with(|| decode64_index(a).cmp(&decode64_index(b)))
}

fn coop_bosses(detail: &Value) -> Result<Vec<BossBrief>, RecordError> {
    let mut bosses: Vec<BossBrief> = Vec::new();
    let Some(enemies) = lookup(detail, &["enemyResults"]).and_then(Value::as_array) else {
        return Ok(bosses);
    };

    for enemy in enemies {
        let id = require_str(enemy, &["enemy", "id"])?;
        let index = match bosses.iter().position(|boss| boss.id == id) {
            Some(index) => index,
            None => {
                bosses.push(BossBrief {
                    id: id.to_string(),
                    appear: 0,
                    defeat: 0,
                    defeat_team: 0,
                });
                bosses.len() - 1
            }
        };
        let boss = &mut bosses[index];
        boss.appear += opt_i64(enemy, &["popCount"]).unwrap_or(0);
        boss.defeat += opt_i64(enemy, &["defeatCount"]).unwrap_or(0);
        boss.defeat_team += opt_i64(enemy, &["teamDefeatCount"]).unwrap_or(0);
    }

    bosses.sort_by_key(|boss| decode64_index(&boss.id));
    Ok(bosses)
}
