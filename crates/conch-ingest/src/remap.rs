//! Reshapes third-party exports into the wrapped payloads the ingestor takes.
//! Only field moves and image URL reconstruction happen here.

use crate::ingestor::{IncomingRecord, IngestError};
use conch_core::record::ResultKind;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

const NINTENDO_RESOURCES: &str = "https://api.lp1.av5ja.srv.nintendo.net/resources/prod/v2";
const SPLATOON3_INK_RESOURCES: &str = "https://splatoon3.ink/assets/splatnet/v2";

/// The "random" weapon and special images, only hosted on splatoon3.ink.
const RANDOM_IMAGES: [&str; 2] = [
    "473fffb2442075078d8bb7125744905abdeae651b6a5b7453ae295582e45f7d1_0.png",
    "9d7272733ae2f2282938da17d69f13419a935eef42239132a02fcf37d8678f10_0.png",
];

/// Strips an s3s `{"data": ...}` envelope.
pub fn unwrap_s3s(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.len() == 1 && map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Classifies a wrapped payload by its envelope key.
pub fn classify(payload: Value) -> Option<IncomingRecord> {
    let payload = unwrap_s3s(payload);
    for kind in [ResultKind::Battle, ResultKind::Coop] {
        if payload.get(kind.envelope_key()).is_some_and(Value::is_object) {
            return Some(IncomingRecord::new(kind, payload));
        }
    }
    None
}

/// Puts a record of `kind` into wrapped form: s3s envelopes are stripped and a
/// bare detail object gets the kind's envelope.
pub fn normalize(kind: ResultKind, payload: Value) -> IncomingRecord {
    let payload = unwrap_s3s(payload);
    if payload.get(kind.envelope_key()).is_some() {
        return IncomingRecord::new(kind, payload);
    }
    if payload.get("id").is_some() && payload.get("playedTime").is_some() {
        return IncomingRecord::new(kind, kind.wrap(payload));
    }
    IncomingRecord::new(kind, payload)
}

/// Records of an s3s `results.json` / `coop_results.json` export: an array of
/// `{"data": {...}}` objects. Entries of neither kind are returned untouched
/// in the second list so the caller can count them as failures.
pub fn s3s_export(document: Value) -> Result<(Vec<IncomingRecord>, Vec<Value>), IngestError> {
    let Value::Array(entries) = document else {
        return Err(IngestError::Format(
            "s3s export must be an array of results".to_string(),
        ));
    };

    let mut records = Vec::with_capacity(entries.len());
    let mut unknown = Vec::new();
    for entry in entries {
        match classify(entry.clone()) {
            Some(record) => records.push(record),
            None => unknown.push(entry),
        }
    }
    Ok((records, unknown))
}

/// Image file name of a weapon, as the sha256 of its row id.
pub fn weapon_image(row_id: &str) -> String {
    let digest = Sha256::digest(row_id.as_bytes());
    let hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    format!("{hex}_0.png")
}

/// Weapon images that salmdroidNW rebuilds against the Nintendo host.
#[derive(Debug, Clone, Default)]
pub struct GrizzcoImages(HashSet<String>);

impl GrizzcoImages {
    pub fn from_row_ids<I, S>(row_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            row_ids
                .into_iter()
                .map(|row_id| weapon_image(row_id.as_ref()))
                .collect(),
        )
    }

    fn contains(&self, weapon: &Value) -> bool {
        weapon
            .pointer("/image/url")
            .and_then(Value::as_str)
            .is_some_and(|url| self.0.contains(url))
    }
}

/// Coop records of one salmdroidNW backup page, `{"results": "<json>"}` where
/// each result carries its detail as a JSON string in `coopHistory`. Results
/// that cannot be read come back as messages in the second list.
pub fn salmdroid_page(
    page: &Value,
    grizzco: &GrizzcoImages,
) -> Result<(Vec<IncomingRecord>, Vec<String>), IngestError> {
    let results = page
        .get("results")
        .and_then(Value::as_str)
        .ok_or_else(|| IngestError::Format("salmdroidNW page has no `results`".to_string()))?;
    let results: Vec<Value> = serde_json::from_str(results)?;

    let mut records = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for (index, result) in results.iter().enumerate() {
        let Some(history) = result.get("coopHistory").and_then(Value::as_str) else {
            failures.push(format!("salmdroidNW result {index} has no `coopHistory`"));
            continue;
        };
        match serde_json::from_str::<Value>(history) {
            Ok(mut detail) => {
                rebuild_coop_images(&mut detail, grizzco);
                records.push(IncomingRecord::Coop(ResultKind::Coop.wrap(detail)));
            }
            Err(err) => failures.push(format!("salmdroidNW result {index}: {err}")),
        }
    }
    Ok((records, failures))
}

/// salmdroidNW keeps only the file name of each image.
pub fn rebuild_coop_images(detail: &mut Value, grizzco: &GrizzcoImages) {
    if let Some(my_result) = detail.get_mut("myResult") {
        rebuild_member_images(my_result, grizzco);
    }
    for member in array_items(detail, "memberResults") {
        rebuild_member_images(member, grizzco);
    }
    if let Some(boss) = detail.pointer_mut("/bossResult/boss") {
        decorate(boss, NINTENDO_RESOURCES, "coop_enemy_img");
    }
    for enemy in array_items(detail, "enemyResults") {
        if let Some(enemy) = enemy.get_mut("enemy") {
            decorate(enemy, NINTENDO_RESOURCES, "coop_enemy_img");
        }
    }
    for wave in array_items(detail, "waveResults") {
        for special in array_items(wave, "specialWeapons") {
            decorate(special, NINTENDO_RESOURCES, "special_img/blue");
        }
    }
    if let Some(stage) = detail.get_mut("coopStage") {
        decorate(stage, NINTENDO_RESOURCES, "stage_img/banner/high_resolution");
    }
    for weapon in array_items(detail, "weapons") {
        if is_random(weapon) {
            decorate(weapon, SPLATOON3_INK_RESOURCES, "ui_img");
        } else {
            decorate(weapon, SPLATOON3_INK_RESOURCES, "weapon_illust");
        }
    }
}

fn rebuild_member_images(member: &mut Value, grizzco: &GrizzcoImages) {
    if let Some(player) = member.get_mut("player") {
        for badge in player
            .pointer_mut("/nameplate/badges")
            .and_then(Value::as_array_mut)
            .into_iter()
            .flatten()
        {
            if !badge.is_null() {
                decorate(badge, NINTENDO_RESOURCES, "badge_img");
            }
        }
        if let Some(background) = player.pointer_mut("/nameplate/background") {
            decorate(background, NINTENDO_RESOURCES, "npl_img");
        }
        if let Some(uniform) = player.get_mut("uniform") {
            decorate(uniform, NINTENDO_RESOURCES, "coop_skin_img");
        }
    }
    for weapon in array_items(member, "weapons") {
        let base = if grizzco.contains(weapon) {
            NINTENDO_RESOURCES
        } else {
            SPLATOON3_INK_RESOURCES
        };
        decorate(weapon, base, "weapon_illust");
    }
    if let Some(special) = member.get_mut("specialWeapon").filter(|special| !special.is_null()) {
        if is_random(special) {
            decorate(special, SPLATOON3_INK_RESOURCES, "ui_img");
        } else {
            decorate(special, NINTENDO_RESOURCES, "special_img/blue");
        }
    }
}

fn array_items<'v>(value: &'v mut Value, key: &str) -> impl Iterator<Item = &'v mut Value> {
    value
        .get_mut(key)
        .and_then(Value::as_array_mut)
        .into_iter()
        .flatten()
}

fn is_random(obj: &Value) -> bool {
    obj.pointer("/image/url")
        .and_then(Value::as_str)
        .is_some_and(|url| RANDOM_IMAGES.contains(&url))
}

/// Prefixes `image.url` with `base/path` unless it is already absolute.
fn decorate(obj: &mut Value, base: &str, path: &str) {
    let Some(url) = obj.pointer_mut("/image/url") else {
        return;
    };
    let Some(file) = url.as_str() else {
        return;
    };
    if file.starts_with("http://") || file.starts_with("https://") {
        return;
    }
    *url = Value::String(format!("{base}/{path}/{file}"));
}
