//! Minimal but structurally complete result payloads for tests.

use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct BattleFixture {
    pub id: String,
    pub played_time: String,
    pub mode: String,
    pub rule: String,
    pub stage: String,
    pub weapon: String,
    /// The first player is the local player; the first half forms their team.
    pub players: Vec<String>,
}

impl BattleFixture {
    pub fn new(id: &str, played_time: &str) -> Self {
        Self {
            id: id.to_string(),
            played_time: played_time.to_string(),
            mode: "VnNNb2RlLTI=".to_string(),
            rule: "VnNSdWxlLTA=".to_string(),
            stage: "VnNTdGFnZS0x".to_string(),
            weapon: "V2VhcG9uLTQw".to_string(),
            players: ["p-self", "p-ally", "p-foe-1", "p-foe-2"]
                .iter()
                .map(|player| format!("{player}-{id}"))
                .collect(),
        }
    }

    pub fn to_json(&self) -> Value {
        let split = self.players.len().div_ceil(2);
        let player = |index: usize, id: &String| {
            let weapon = if index == 0 {
                self.weapon.as_str()
            } else {
                "V2VhcG9uLTA="
            };
            json!({
                "id": id,
                "isMyself": index == 0,
                "paint": 1000,
                "weapon": {
                    "id": weapon,
                    "subWeapon": {"id": "U3ViV2VhcG9uLTA="},
                    "specialWeapon": {"id": "U3BlY2lhbFdlYXBvbi0x"},
                },
                "result": {"kill": 3, "assist": 1, "death": 2, "special": 1, "noroshiTry": null},
            })
        };
        let players = self
            .players
            .iter()
            .enumerate()
            .map(|(index, id)| player(index, id))
            .collect::<Vec<_>>();

        json!({
            "vsHistoryDetail": {
                "id": self.id,
                "playedTime": self.played_time,
                "duration": 180,
                "judgement": "WIN",
                "vsMode": {"id": self.mode},
                "vsRule": {"id": self.rule},
                "vsStage": {"id": self.stage},
                "bankaraMatch": null,
                "xMatch": null,
                "leagueMatch": null,
                "festMatch": null,
                "myTeam": {"players": players[..split]},
                "otherTeams": [{"players": players[split..]}],
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct CoopFixture {
    pub id: String,
    pub played_time: String,
    pub rule: String,
    pub stage: String,
    /// Image hashes of the local player's weapons.
    pub weapons: Vec<String>,
    /// The first player is the local player.
    pub players: Vec<String>,
    pub result_wave: i64,
    /// King salmonid id and whether it was defeated; adds an extra wave.
    pub king: Option<(String, bool)>,
}

impl CoopFixture {
    pub fn new(id: &str, played_time: &str) -> Self {
        Self {
            id: id.to_string(),
            played_time: played_time.to_string(),
            rule: "REGULAR".to_string(),
            stage: "Q29vcFN0YWdlLTE=".to_string(),
            weapons: vec!["0e12ab".to_string(), "7f3c9d".to_string()],
            players: ["c-self", "c-one", "c-two", "c-three"]
                .iter()
                .map(|player| format!("{player}-{id}"))
                .collect(),
            result_wave: 0,
            king: Some(("Q29vcEVuZW15LTIz".to_string(), true)),
        }
    }

    pub fn to_json(&self) -> Value {
        let weapons = self
            .weapons
            .iter()
            .map(|hash| json!({"image": {"url": image_url("weapon", hash)}}))
            .collect::<Vec<_>>();
        let member = |id: &String| {
            json!({
                "player": {"id": id},
                "weapons": weapons,
                "specialWeapon": {"image": {"url": image_url("special", "5e4f21")}},
                "defeatEnemyCount": 10,
                "goldenDeliverCount": 8,
                "goldenAssistCount": 2,
                "deliverCount": 30,
                "rescueCount": 1,
                "rescuedCount": 0,
            })
        };

        let mut waves = vec![
            json!({"waveNumber": 1, "waterLevel": 1, "eventWave": null}),
            json!({"waveNumber": 2, "waterLevel": 2, "eventWave": null}),
            json!({"waveNumber": 3, "waterLevel": 1, "eventWave": null}),
        ];
        if self.king.is_some() {
            waves.push(json!({"waveNumber": 4, "waterLevel": 1, "eventWave": null}));
        }
        let boss_result = match &self.king {
            Some((id, defeated)) => json!({"boss": {"id": id}, "hasDefeatBoss": defeated}),
            None => Value::Null,
        };
        let scale = match &self.king {
            Some(_) => json!({"gold": 1, "silver": 2, "bronze": 3}),
            None => Value::Null,
        };

        json!({
            "coopHistoryDetail": {
                "id": self.id,
                "playedTime": self.played_time,
                "rule": self.rule,
                "coopStage": {"id": self.stage},
                "resultWave": self.result_wave,
                "dangerRate": 1.2,
                "jobPoint": 100,
                "afterGrade": {"id": "Q29vcEdyYWRlLTg="},
                "afterGradePoint": 40,
                "weapons": weapons,
                "myResult": member(&self.players[0]),
                "memberResults": self.players[1..].iter().map(member).collect::<Vec<_>>(),
                "waveResults": waves,
                "enemyResults": [
                    {"enemy": {"id": "Q29vcEVuZW15LTU="}, "popCount": 3, "defeatCount": 1, "teamDefeatCount": 3},
                    {"enemy": {"id": "Q29vcEVuZW15LTQ="}, "popCount": 5, "defeatCount": 2, "teamDefeatCount": 4},
                ],
                "bossResult": boss_result,
                "scale": scale,
            }
        })
    }
}

fn image_url(kind: &str, hash: &str) -> String {
    format!("https://cdn.example.test/resources/prod/{kind}/{hash}_0.png?Expires=1&Signature=s")
}
