//! The entity types of the speech database.
//!
//! Each entity is built once per session from its JSON record and then
//! shared by reference: two speeches naming the same character hold the
//! same `Arc<CharacterInstance>`, so "same speaker" is pointer identity.
//! Core attributes never change after construction; the one permitted
//! mutation is memoized derived state (a cluster's first speech).

use serde::Deserialize;
use speechdb::RawRecord;
use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

/// Numeric id of an entity, unique within its type.
pub type EntityId = u64;

/// The six entity types of the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Author,
    Work,
    Character,
    CharacterInstance,
    SpeechCluster,
    Speech,
}

impl EntityKind {
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Author => "author",
            EntityKind::Work => "work",
            EntityKind::Character => "character",
            EntityKind::CharacterInstance => "character instance",
            EntityKind::SpeechCluster => "speech cluster",
            EntityKind::Speech => "speech",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Common surface of every entity type: identity plus the opaque
/// attribute bag (the full record as received, for ad hoc filtering).
pub trait Entity: Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> EntityId;
    fn attributes(&self) -> &RawRecord;
}

/// Default ordering used by `Collection::sorted`.
pub trait NaturalOrder {
    fn natural_cmp(&self, other: &Self) -> Ordering;
}

/// Gender of a character, as tagged in the database.
///
/// Unknown server values map to `Other` rather than failing the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum Gender {
    Male,
    Female,
    NonBinary,
    Mixed,
    Other,
}

impl Gender {
    pub fn parse(s: &str) -> Self {
        match s {
            "male" => Gender::Male,
            "female" => Gender::Female,
            "non-binary" | "nonbinary" => Gender::NonBinary,
            "mixed" => Gender::Mixed,
            _ => Gender::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::NonBinary => "non-binary",
            Gender::Mixed => "mixed",
            Gender::Other => "other",
        }
    }
}

impl From<String> for Gender {
    fn from(s: String) -> Self {
        Gender::parse(&s)
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of being a character is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum Being {
    Mortal,
    Divine,
    Creature,
    Other,
}

impl Being {
    pub fn parse(s: &str) -> Self {
        match s {
            "mortal" => Being::Mortal,
            "divine" => Being::Divine,
            "creature" => Being::Creature,
            _ => Being::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Being::Mortal => "mortal",
            Being::Divine => "divine",
            Being::Creature => "creature",
            Being::Other => "other",
        }
    }
}

impl From<String> for Being {
    fn from(s: String) -> Self {
        Being::parse(&s)
    }
}

impl fmt::Display for Being {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a character is an individual or a collective (a crowd, a chorus).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum Number {
    Individual,
    Collective,
    Other,
}

impl Number {
    pub fn parse(s: &str) -> Self {
        match s {
            "individual" => Number::Individual,
            "collective" => Number::Collective,
            _ => Number::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Number::Individual => "individual",
            Number::Collective => "collective",
            Number::Other => "other",
        }
    }
}

impl From<String> for Number {
    fn from(s: String) -> Self {
        Number::parse(&s)
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An ancient author.
#[derive(Debug)]
pub struct Author {
    pub id: EntityId,
    pub name: Option<String>,
    /// WikiData id, for linked-data lookups.
    pub wd: Option<String>,
    /// CTS URN of the author.
    pub urn: Option<String>,
    pub attributes: RawRecord,
}

impl Entity for Author {
    const KIND: EntityKind = EntityKind::Author;

    fn id(&self) -> EntityId {
        self.id
    }

    fn attributes(&self) -> &RawRecord {
        &self.attributes
    }
}

impl NaturalOrder for Author {
    fn natural_cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

/// An epic poem.
#[derive(Debug)]
pub struct Work {
    pub id: EntityId,
    pub title: Option<String>,
    /// Language of the text, e.g. `greek` or `latin`.
    pub lang: Option<String>,
    pub wd: Option<String>,
    pub urn: Option<String>,
    pub author: Option<Arc<Author>>,
    pub attributes: RawRecord,
}

impl Work {
    /// Name of the author, when both are known.
    pub fn author_name(&self) -> Option<&str> {
        self.author.as_ref().and_then(|a| a.name.as_deref())
    }
}

impl Entity for Work {
    const KIND: EntityKind = EntityKind::Work;

    fn id(&self) -> EntityId {
        self.id
    }

    fn attributes(&self) -> &RawRecord {
        &self.attributes
    }
}

impl NaturalOrder for Work {
    fn natural_cmp(&self, other: &Self) -> Ordering {
        self.author_name()
            .cmp(&other.author_name())
            .then_with(|| self.title.cmp(&other.title))
    }
}

/// The base identity of an epic character.
#[derive(Debug)]
pub struct Character {
    pub id: EntityId,
    pub name: Option<String>,
    pub being: Option<Being>,
    pub number: Option<Number>,
    pub gender: Option<Gender>,
    pub wd: Option<String>,
    /// MANTO id, for genealogy-database lookups.
    pub manto: Option<String>,
    pub attributes: RawRecord,
}

impl Entity for Character {
    const KIND: EntityKind = EntityKind::Character;

    fn id(&self) -> EntityId {
        self.id
    }

    fn attributes(&self) -> &RawRecord {
        &self.attributes
    }
}

impl NaturalOrder for Character {
    fn natural_cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

/// One appearance of a character in context.
///
/// Contextual fields override the underlying character; an anonymous
/// instance has no underlying character at all.
#[derive(Debug)]
pub struct CharacterInstance {
    pub id: EntityId,
    /// Where the instance appears, e.g. the episode or scene tag.
    pub context: Option<String>,
    /// Contextual name override.
    pub name: Option<String>,
    pub being: Option<Being>,
    pub number: Option<Number>,
    pub gender: Option<Gender>,
    /// Identity the character assumes when speaking in disguise.
    pub disguise: Option<String>,
    /// True when the speaker is unnamed in the text.
    pub anon: bool,
    pub character: Option<Arc<Character>>,
    pub attributes: RawRecord,
}

impl CharacterInstance {
    /// Display name: the contextual override, else the underlying
    /// character's name, else the context tag (anonymous speakers).
    pub fn display_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or_else(|| self.character.as_ref().and_then(|c| c.name.as_deref()))
            .or(self.context.as_deref())
    }

    /// Contextual gender, else the underlying character's gender.
    pub fn gender(&self) -> Option<Gender> {
        self.gender
            .or_else(|| self.character.as_ref().and_then(|c| c.gender))
    }

    /// Contextual being, else the underlying character's being.
    pub fn being(&self) -> Option<Being> {
        self.being
            .or_else(|| self.character.as_ref().and_then(|c| c.being))
    }

    /// Contextual number, else the underlying character's number.
    pub fn number(&self) -> Option<Number> {
        self.number
            .or_else(|| self.character.as_ref().and_then(|c| c.number))
    }
}

impl Entity for CharacterInstance {
    const KIND: EntityKind = EntityKind::CharacterInstance;

    fn id(&self) -> EntityId {
        self.id
    }

    fn attributes(&self) -> &RawRecord {
        &self.attributes
    }
}

impl NaturalOrder for CharacterInstance {
    fn natural_cmp(&self, other: &Self) -> Ordering {
        self.display_name().cmp(&other.display_name())
    }
}

/// A group of speeches forming one conversational unit.
#[derive(Debug)]
pub struct SpeechCluster {
    pub id: EntityId,
    /// Conversation-type tag, e.g. monologue or dialogue.
    pub cluster_type: Option<String>,
    pub work: Option<Arc<Work>>,
    pub attributes: RawRecord,
    /// Memoized first speech of the cluster, derived on demand by
    /// `Session::first_speech`. Weak so the graph stays acyclic.
    pub(crate) first_speech: OnceLock<Weak<Speech>>,
}

impl SpeechCluster {
    /// The memoized first speech, if it has been derived already.
    pub fn first_speech(&self) -> Option<Arc<Speech>> {
        self.first_speech.get().and_then(Weak::upgrade)
    }
}

impl Entity for SpeechCluster {
    const KIND: EntityKind = EntityKind::SpeechCluster;

    fn id(&self) -> EntityId {
        self.id
    }

    fn attributes(&self) -> &RawRecord {
        &self.attributes
    }
}

impl NaturalOrder for SpeechCluster {
    fn natural_cmp(&self, other: &Self) -> Ordering {
        cmp_opt_natural(self.work.as_deref(), other.work.as_deref())
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// A single speech.
#[derive(Debug)]
pub struct Speech {
    pub id: EntityId,
    /// Position of the speech within its work.
    pub seq: Option<u64>,
    /// Locus of the first line, e.g. `1.26`.
    pub l_fi: Option<String>,
    /// Locus of the last line.
    pub l_la: Option<String>,
    /// Part number for multi-part speeches.
    pub part: Option<u64>,
    /// Type tag of the speech.
    pub speech_type: Option<String>,
    pub cluster: Option<Arc<SpeechCluster>>,
    pub speakers: Vec<Arc<CharacterInstance>>,
    pub addressees: Vec<Arc<CharacterInstance>>,
    pub attributes: RawRecord,
}

impl Speech {
    /// Shortcut to the work, via the cluster.
    pub fn work(&self) -> Option<&Arc<Work>> {
        self.cluster.as_ref().and_then(|c| c.work.as_ref())
    }

    /// Shortcut to the author, via the work.
    pub fn author(&self) -> Option<&Arc<Author>> {
        self.work().and_then(|w| w.author.as_ref())
    }

    /// Language of the speech, from the work record.
    pub fn lang(&self) -> Option<&str> {
        self.work().and_then(|w| w.lang.as_deref())
    }

    /// Line range in `<first>-<last>` format, when both loci are known.
    pub fn line_range(&self) -> Option<String> {
        match (&self.l_fi, &self.l_la) {
            (Some(fi), Some(la)) => Some(format!("{fi}-{la}")),
            _ => None,
        }
    }

    /// CTS URN of the passage, for text-retrieval collaborators.
    pub fn urn(&self) -> Option<String> {
        let work_urn = self.work().and_then(|w| w.urn.as_deref())?;
        let range = self.line_range()?;
        Some(format!("{work_urn}:{range}"))
    }
}

impl fmt::Display for Speech {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let author = self.author().and_then(|a| a.name.as_deref()).unwrap_or("?");
        let work = self
            .work()
            .and_then(|w| w.title.as_deref())
            .unwrap_or("?");
        let range = self.line_range().unwrap_or_else(|| "?".to_string());
        write!(f, "<Speech: {author} {work} {range}>")
    }
}

impl Entity for Speech {
    const KIND: EntityKind = EntityKind::Speech;

    fn id(&self) -> EntityId {
        self.id
    }

    fn attributes(&self) -> &RawRecord {
        &self.attributes
    }
}

impl NaturalOrder for Speech {
    fn natural_cmp(&self, other: &Self) -> Ordering {
        cmp_opt_natural(self.work().map(|w| &**w), other.work().map(|w| &**w))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Compare optional references by natural order, absent values first.
fn cmp_opt_natural<T: NaturalOrder>(a: Option<&T>, b: Option<&T>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.natural_cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author(name: &str) -> Arc<Author> {
        Arc::new(Author {
            id: 1,
            name: Some(name.to_string()),
            wd: None,
            urn: None,
            attributes: RawRecord::new(),
        })
    }

    fn work(title: &str, urn: Option<&str>, author: Option<Arc<Author>>) -> Arc<Work> {
        Arc::new(Work {
            id: 10,
            title: Some(title.to_string()),
            lang: Some("greek".to_string()),
            wd: None,
            urn: urn.map(str::to_string),
            author,
            attributes: RawRecord::new(),
        })
    }

    fn speech(work: Option<Arc<Work>>, l_fi: Option<&str>, l_la: Option<&str>) -> Speech {
        let cluster = work.map(|w| {
            Arc::new(SpeechCluster {
                id: 5,
                cluster_type: None,
                work: Some(w),
                attributes: RawRecord::new(),
                first_speech: OnceLock::new(),
            })
        });
        Speech {
            id: 100,
            seq: Some(1),
            l_fi: l_fi.map(str::to_string),
            l_la: l_la.map(str::to_string),
            part: None,
            speech_type: None,
            cluster,
            speakers: Vec::new(),
            addressees: Vec::new(),
            attributes: RawRecord::new(),
        }
    }

    #[test]
    fn test_gender_parse_round_trip() {
        assert_eq!(Gender::parse("female"), Gender::Female);
        assert_eq!(Gender::parse("non-binary"), Gender::NonBinary);
        assert_eq!(Gender::parse("something else"), Gender::Other);
        assert_eq!(Gender::Female.as_str(), "female");
    }

    #[test]
    fn test_speech_shortcuts() {
        let a = author("Homer");
        let w = work("Iliad", Some("urn:cts:greekLit:tlg0012.tlg001"), Some(a));
        let s = speech(Some(w), Some("1.26"), Some("1.32"));

        assert_eq!(s.author().unwrap().name.as_deref(), Some("Homer"));
        assert_eq!(s.work().unwrap().title.as_deref(), Some("Iliad"));
        assert_eq!(s.lang(), Some("greek"));
        assert_eq!(s.line_range().as_deref(), Some("1.26-1.32"));
        assert_eq!(
            s.urn().as_deref(),
            Some("urn:cts:greekLit:tlg0012.tlg001:1.26-1.32")
        );
    }

    #[test]
    fn test_speech_urn_requires_work_urn_and_range() {
        let a = author("Homer");
        let w = work("Iliad", None, Some(a));
        let s = speech(Some(w), Some("1.26"), Some("1.32"));
        assert_eq!(s.urn(), None);

        let s = speech(None, Some("1.26"), None);
        assert_eq!(s.line_range(), None);
        assert_eq!(s.urn(), None);
    }

    #[test]
    fn test_instance_fallbacks() {
        let base = Arc::new(Character {
            id: 7,
            name: Some("Athena".to_string()),
            being: Some(Being::Divine),
            number: Some(Number::Individual),
            gender: Some(Gender::Female),
            wd: None,
            manto: None,
            attributes: RawRecord::new(),
        });

        let inst = CharacterInstance {
            id: 70,
            context: Some("Od. book 1".to_string()),
            name: Some("Mentes".to_string()),
            being: None,
            number: None,
            gender: None,
            disguise: Some("Mentes".to_string()),
            anon: false,
            character: Some(base.clone()),
            attributes: RawRecord::new(),
        };

        assert_eq!(inst.display_name(), Some("Mentes"));
        assert_eq!(inst.gender(), Some(Gender::Female));
        assert_eq!(inst.being(), Some(Being::Divine));

        let anonymous = CharacterInstance {
            id: 71,
            context: Some("Il. book 2".to_string()),
            name: None,
            being: None,
            number: None,
            gender: Some(Gender::Male),
            disguise: None,
            anon: true,
            character: None,
            attributes: RawRecord::new(),
        };

        assert_eq!(anonymous.display_name(), Some("Il. book 2"));
        assert_eq!(anonymous.gender(), Some(Gender::Male));
        assert_eq!(anonymous.being(), None);
    }

    #[test]
    fn test_natural_order_works_by_author_then_title() {
        let homer = author("Homer");
        let vergil = author("Vergil");
        let iliad = work("Iliad", None, Some(homer.clone()));
        let odyssey = work("Odyssey", None, Some(homer));
        let aeneid = work("Aeneid", None, Some(vergil));

        assert_eq!(iliad.natural_cmp(&odyssey), Ordering::Less);
        assert_eq!(odyssey.natural_cmp(&aeneid), Ordering::Less);
        assert_eq!(aeneid.natural_cmp(&iliad), Ordering::Greater);
    }

    #[test]
    fn test_speech_display() {
        let a = author("Homer");
        let w = work("Iliad", None, Some(a));
        let s = speech(Some(w), Some("1.26"), Some("1.32"));
        assert_eq!(s.to_string(), "<Speech: Homer Iliad 1.26-1.32>");
    }
}
