//! Conversion of raw JSON records into cached entities.
//!
//! Each builder extracts the typed fields of one record, resolves nested
//! reference records recursively through the session caches, and stores
//! the full record as the entity's attribute bag. A nested reference may
//! arrive as a full embedded object, as a bare integer id (resolved to a
//! minimally-populated placeholder), or not at all, in which case the
//! field stays `None`: an anonymous speaker is a valid record. Only a
//! record whose own id is missing or unusable fails the build.

use crate::cache::Caches;
use crate::entities::{
    Author, Being, Character, CharacterInstance, EntityId, EntityKind, Gender, Number, Speech,
    SpeechCluster, Work,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use speechdb::RawRecord;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Errors for records that cannot establish an entity.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{kind} record has no usable id")]
    MissingId { kind: EntityKind },

    #[error("{kind} record is malformed: {detail}")]
    Malformed { kind: EntityKind, detail: String },
}

fn malformed(kind: EntityKind, detail: impl Into<String>) -> BuildError {
    BuildError::Malformed {
        kind,
        detail: detail.into(),
    }
}

fn record_id(rec: &RawRecord, kind: EntityKind) -> Result<EntityId, BuildError> {
    rec.get("id")
        .and_then(Value::as_u64)
        .ok_or(BuildError::MissingId { kind })
}

fn parse<R: DeserializeOwned>(rec: &RawRecord, kind: EntityKind) -> Result<R, BuildError> {
    serde_json::from_value(Value::Object(rec.clone())).map_err(|e| malformed(kind, e.to_string()))
}

/// Attribute bag for a placeholder built from a bare id.
fn bare_attributes(id: EntityId) -> RawRecord {
    let mut attributes = RawRecord::new();
    attributes.insert("id".to_string(), Value::from(id));
    attributes
}

fn bare_id(n: &serde_json::Number, kind: EntityKind) -> Result<EntityId, BuildError> {
    n.as_u64()
        .ok_or_else(|| malformed(kind, format!("reference id {n} is not a non-negative integer")))
}

// ============================================================================
// Raw record shapes (typed fields only; unknown keys stay in the bag)
// ============================================================================

#[derive(Deserialize)]
struct RawAuthor {
    name: Option<String>,
    wd: Option<String>,
    urn: Option<String>,
}

#[derive(Deserialize)]
struct RawWork {
    title: Option<String>,
    lang: Option<String>,
    wd: Option<String>,
    urn: Option<String>,
    author: Option<Value>,
}

#[derive(Deserialize)]
struct RawCharacter {
    name: Option<String>,
    being: Option<Being>,
    number: Option<Number>,
    gender: Option<Gender>,
    wd: Option<String>,
    manto: Option<String>,
}

#[derive(Deserialize)]
struct RawInstance {
    context: Option<String>,
    name: Option<String>,
    being: Option<Being>,
    number: Option<Number>,
    gender: Option<Gender>,
    #[serde(rename = "disg")]
    disguise: Option<String>,
    anon: Option<bool>,
    #[serde(rename = "char")]
    character: Option<Value>,
}

#[derive(Deserialize)]
struct RawCluster {
    #[serde(rename = "type")]
    cluster_type: Option<String>,
    work: Option<Value>,
}

#[derive(Deserialize)]
struct RawSpeech {
    seq: Option<u64>,
    l_fi: Option<String>,
    l_la: Option<String>,
    part: Option<u64>,
    #[serde(rename = "type")]
    speech_type: Option<String>,
    cluster: Option<Value>,
    spkr: Option<Vec<Value>>,
    addr: Option<Vec<Value>>,
}

// ============================================================================
// Builders
// ============================================================================

pub(crate) fn author(caches: &Caches, rec: &RawRecord) -> Result<Arc<Author>, BuildError> {
    let id = record_id(rec, EntityKind::Author)?;
    if let Some(existing) = caches.authors.get(id) {
        return Ok(existing);
    }
    let raw: RawAuthor = parse(rec, EntityKind::Author)?;
    Ok(caches.authors.insert_if_absent(
        id,
        Author {
            id,
            name: raw.name,
            wd: raw.wd,
            urn: raw.urn,
            attributes: rec.clone(),
        },
    ))
}

pub(crate) fn work(caches: &Caches, rec: &RawRecord) -> Result<Arc<Work>, BuildError> {
    let id = record_id(rec, EntityKind::Work)?;
    if let Some(existing) = caches.works.get(id) {
        return Ok(existing);
    }
    let raw: RawWork = parse(rec, EntityKind::Work)?;
    let author = resolve_author(caches, raw.author.as_ref())?;
    Ok(caches.works.insert_if_absent(
        id,
        Work {
            id,
            title: raw.title,
            lang: raw.lang,
            wd: raw.wd,
            urn: raw.urn,
            author,
            attributes: rec.clone(),
        },
    ))
}

pub(crate) fn character(caches: &Caches, rec: &RawRecord) -> Result<Arc<Character>, BuildError> {
    let id = record_id(rec, EntityKind::Character)?;
    if let Some(existing) = caches.characters.get(id) {
        return Ok(existing);
    }
    let raw: RawCharacter = parse(rec, EntityKind::Character)?;
    Ok(caches.characters.insert_if_absent(
        id,
        Character {
            id,
            name: raw.name,
            being: raw.being,
            number: raw.number,
            gender: raw.gender,
            wd: raw.wd,
            manto: raw.manto,
            attributes: rec.clone(),
        },
    ))
}

pub(crate) fn instance(
    caches: &Caches,
    rec: &RawRecord,
) -> Result<Arc<CharacterInstance>, BuildError> {
    let id = record_id(rec, EntityKind::CharacterInstance)?;
    if let Some(existing) = caches.instances.get(id) {
        return Ok(existing);
    }
    let raw: RawInstance = parse(rec, EntityKind::CharacterInstance)?;
    let character = resolve_character(caches, raw.character.as_ref())?;
    Ok(caches.instances.insert_if_absent(
        id,
        CharacterInstance {
            id,
            context: raw.context,
            name: raw.name,
            being: raw.being,
            number: raw.number,
            gender: raw.gender,
            disguise: raw.disguise,
            anon: raw.anon.unwrap_or(false),
            character,
            attributes: rec.clone(),
        },
    ))
}

pub(crate) fn cluster(caches: &Caches, rec: &RawRecord) -> Result<Arc<SpeechCluster>, BuildError> {
    let id = record_id(rec, EntityKind::SpeechCluster)?;
    if let Some(existing) = caches.clusters.get(id) {
        return Ok(existing);
    }
    let raw: RawCluster = parse(rec, EntityKind::SpeechCluster)?;
    let work = resolve_work(caches, raw.work.as_ref())?;
    Ok(caches.clusters.insert_if_absent(
        id,
        SpeechCluster {
            id,
            cluster_type: raw.cluster_type,
            work,
            attributes: rec.clone(),
            first_speech: OnceLock::new(),
        },
    ))
}

pub(crate) fn speech(caches: &Caches, rec: &RawRecord) -> Result<Arc<Speech>, BuildError> {
    let id = record_id(rec, EntityKind::Speech)?;
    if let Some(existing) = caches.speeches.get(id) {
        return Ok(existing);
    }
    let raw: RawSpeech = parse(rec, EntityKind::Speech)?;
    let cluster = resolve_cluster(caches, raw.cluster.as_ref())?;
    let speakers = resolve_instances(caches, raw.spkr)?;
    let addressees = resolve_instances(caches, raw.addr)?;
    Ok(caches.speeches.insert_if_absent(
        id,
        Speech {
            id,
            seq: raw.seq,
            l_fi: raw.l_fi,
            l_la: raw.l_la,
            part: raw.part,
            speech_type: raw.speech_type,
            cluster,
            speakers,
            addressees,
            attributes: rec.clone(),
        },
    ))
}

// ============================================================================
// Nested reference resolution
// ============================================================================

fn resolve_author(caches: &Caches, value: Option<&Value>) -> Result<Option<Arc<Author>>, BuildError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(rec)) => Ok(Some(author(caches, rec)?)),
        Some(Value::Number(n)) => {
            let id = bare_id(n, EntityKind::Author)?;
            Ok(Some(caches.authors.insert_if_absent(
                id,
                Author {
                    id,
                    name: None,
                    wd: None,
                    urn: None,
                    attributes: bare_attributes(id),
                },
            )))
        }
        Some(other) => Err(malformed(
            EntityKind::Author,
            format!("reference is neither object nor id: {other}"),
        )),
    }
}

fn resolve_work(caches: &Caches, value: Option<&Value>) -> Result<Option<Arc<Work>>, BuildError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(rec)) => Ok(Some(work(caches, rec)?)),
        Some(Value::Number(n)) => {
            let id = bare_id(n, EntityKind::Work)?;
            Ok(Some(caches.works.insert_if_absent(
                id,
                Work {
                    id,
                    title: None,
                    lang: None,
                    wd: None,
                    urn: None,
                    author: None,
                    attributes: bare_attributes(id),
                },
            )))
        }
        Some(other) => Err(malformed(
            EntityKind::Work,
            format!("reference is neither object nor id: {other}"),
        )),
    }
}

fn resolve_character(
    caches: &Caches,
    value: Option<&Value>,
) -> Result<Option<Arc<Character>>, BuildError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(rec)) => Ok(Some(character(caches, rec)?)),
        Some(Value::Number(n)) => {
            let id = bare_id(n, EntityKind::Character)?;
            Ok(Some(caches.characters.insert_if_absent(
                id,
                Character {
                    id,
                    name: None,
                    being: None,
                    number: None,
                    gender: None,
                    wd: None,
                    manto: None,
                    attributes: bare_attributes(id),
                },
            )))
        }
        Some(other) => Err(malformed(
            EntityKind::Character,
            format!("reference is neither object nor id: {other}"),
        )),
    }
}

fn resolve_cluster(
    caches: &Caches,
    value: Option<&Value>,
) -> Result<Option<Arc<SpeechCluster>>, BuildError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(rec)) => Ok(Some(cluster(caches, rec)?)),
        Some(Value::Number(n)) => {
            let id = bare_id(n, EntityKind::SpeechCluster)?;
            Ok(Some(caches.clusters.insert_if_absent(
                id,
                SpeechCluster {
                    id,
                    cluster_type: None,
                    work: None,
                    attributes: bare_attributes(id),
                    first_speech: OnceLock::new(),
                },
            )))
        }
        Some(other) => Err(malformed(
            EntityKind::SpeechCluster,
            format!("reference is neither object nor id: {other}"),
        )),
    }
}

fn resolve_instances(
    caches: &Caches,
    values: Option<Vec<Value>>,
) -> Result<Vec<Arc<CharacterInstance>>, BuildError> {
    let values = values.unwrap_or_default();
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        match value {
            Value::Null => {}
            Value::Object(rec) => out.push(instance(caches, &rec)?),
            Value::Number(n) => {
                let id = bare_id(&n, EntityKind::CharacterInstance)?;
                out.push(caches.instances.insert_if_absent(
                    id,
                    CharacterInstance {
                        id,
                        context: None,
                        name: None,
                        being: None,
                        number: None,
                        gender: None,
                        disguise: None,
                        anon: false,
                        character: None,
                        attributes: bare_attributes(id),
                    },
                ));
            }
            other => {
                return Err(malformed(
                    EntityKind::CharacterInstance,
                    format!("reference is neither object nor id: {other}"),
                ))
            }
        }
    }
    Ok(out)
}
