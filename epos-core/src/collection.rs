//! Generic ordered collections of entities and their query algebra.
//!
//! A `Collection<T>` holds entities of exactly one type, in the order the
//! records were appended (normally server response order), and is bound
//! to the session that materialized them. All operations are implemented
//! once, generically; per-type convenience accessors are layered on top
//! as thin impl blocks. Set operations compare by entity identity (the
//! shared `Arc`), never by value equality.
//!
//! Empty results are valid output, reported only on the diagnostic
//! channel; combining collections of different element types does not
//! compile.

use crate::entities::{
    Author, Being, Character, CharacterInstance, Entity, EntityId, Gender, NaturalOrder, Number,
    Speech, SpeechCluster, Work,
};
use crate::session::Session;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Ordered, type-homogeneous container of cached entities.
pub struct Collection<T> {
    session: Session,
    items: Vec<Arc<T>>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            items: self.items.clone(),
        }
    }
}

impl<T: Entity> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("kind", &T::KIND)
            .field("len", &self.items.len())
            .finish()
    }
}

/// Identity of a cached entity: the address of its shared allocation.
fn identity_key<T>(entity: &Arc<T>) -> usize {
    Arc::as_ptr(entity) as usize
}

fn dedup_identity<T>(items: Vec<Arc<T>>) -> Vec<Arc<T>> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|e| seen.insert(identity_key(e)))
        .collect()
}

impl<T: Entity> Collection<T> {
    pub(crate) fn new(session: Session, items: Vec<Arc<T>>) -> Self {
        Self { session, items }
    }

    /// New collection of the same type, bound to the same session.
    fn derive(&self, items: Vec<Arc<T>>) -> Self {
        Self {
            session: self.session.clone(),
            items,
        }
    }

    /// The session that owns every entity in this collection.
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<T>> {
        self.items.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<T>> {
        self.items.get(index)
    }

    pub fn first(&self) -> Option<&Arc<T>> {
        self.items.first()
    }

    pub fn as_slice(&self) -> &[Arc<T>] {
        &self.items
    }

    pub fn to_vec(&self) -> Vec<Arc<T>> {
        self.items.clone()
    }

    /// Whether this exact instance is an element (identity, not value).
    pub fn contains(&self, entity: &Arc<T>) -> bool {
        self.items.iter().any(|e| Arc::ptr_eq(e, entity))
    }

    /// Ids of all elements, in order, one per element.
    pub fn ids(&self) -> Vec<EntityId> {
        self.items.iter().map(|e| e.id()).collect()
    }

    /// Elements for which the predicate holds, in original order.
    pub fn filter(&self, mut predicate: impl FnMut(&T) -> bool) -> Self {
        let items: Vec<Arc<T>> = self
            .items
            .iter()
            .filter(|e| predicate(e))
            .cloned()
            .collect();
        if items.is_empty() && !self.items.is_empty() {
            tracing::debug!(kind = %T::KIND, "filter produced an empty collection");
        }
        self.derive(items)
    }

    /// Filter on the opaque attribute bag: an element is kept iff its
    /// attribute `name` is present, non-null, and a member of `allowed`,
    /// or (`include_missing`) the attribute is absent or null.
    pub fn filter_by_attribute(
        &self,
        name: &str,
        allowed: &[Value],
        include_missing: bool,
    ) -> Self {
        self.filter(|e| match e.attributes().get(name) {
            None | Some(Value::Null) => include_missing,
            Some(value) => allowed.contains(value),
        })
    }

    /// Filter on a nested attribute path: an element is kept iff every
    /// segment of `path` resolves through nested objects and the final
    /// value equals `expected`.
    pub fn filter_by_attribute_path(&self, path: &[&str], expected: &Value) -> Self {
        self.filter(|e| {
            let mut current: Option<&Value> = None;
            for (i, segment) in path.iter().enumerate() {
                let bag = if i == 0 {
                    e.attributes().get(*segment)
                } else {
                    current.and_then(Value::as_object).and_then(|m| m.get(*segment))
                };
                match bag {
                    Some(value) => current = Some(value),
                    None => return false,
                }
            }
            current == Some(expected)
        })
    }

    /// Concatenation with `other`; unless `keep_duplicates`, elements
    /// present in both (by identity) appear once, at their first position.
    pub fn union(&self, other: &Self, keep_duplicates: bool) -> Self {
        let mut items: Vec<Arc<T>> = self
            .items
            .iter()
            .chain(other.items.iter())
            .cloned()
            .collect();
        if !keep_duplicates {
            items = dedup_identity(items);
        }
        self.derive(items)
    }

    /// Elements of `self` that are also in `other`, in `self`'s order.
    pub fn intersect(&self, other: &Self) -> Self {
        let keys: HashSet<usize> = other.items.iter().map(identity_key).collect();
        self.derive(
            self.items
                .iter()
                .filter(|e| keys.contains(&identity_key(e)))
                .cloned()
                .collect(),
        )
    }

    /// Elements of `self` that are not in `other`, in `self`'s order.
    pub fn difference(&self, other: &Self) -> Self {
        let keys: HashSet<usize> = other.items.iter().map(identity_key).collect();
        self.derive(
            self.items
                .iter()
                .filter(|e| !keys.contains(&identity_key(e)))
                .cloned()
                .collect(),
        )
    }

    /// Append `other`'s elements in place, skipping those already present.
    pub fn extend(&mut self, other: &Self) {
        let mut seen: HashSet<usize> = self.items.iter().map(identity_key).collect();
        for entity in &other.items {
            if seen.insert(identity_key(entity)) {
                self.items.push(entity.clone());
            }
        }
    }

    /// Stable sort by an explicit comparator, returning a new collection.
    pub fn sorted_by(&self, mut compare: impl FnMut(&T, &T) -> Ordering) -> Self {
        let mut items = self.items.clone();
        items.sort_by(|a, b| compare(a, b));
        self.derive(items)
    }

    /// Stable in-place sort by an explicit comparator.
    pub fn sort_by(&mut self, mut compare: impl FnMut(&T, &T) -> Ordering) {
        self.items.sort_by(|a, b| compare(a, b));
    }

    /// Map every element through `accessor`, concatenate, and deduplicate
    /// by identity, preserving first-seen order. The elements of the
    /// result are the same shared instances the accessor returned.
    pub fn flatten<U: Entity>(&self, mut accessor: impl FnMut(&T) -> Vec<Arc<U>>) -> Collection<U> {
        let mut seen = HashSet::new();
        let mut items = Vec::new();
        for entity in &self.items {
            for hit in accessor(entity) {
                if seen.insert(identity_key(&hit)) {
                    items.push(hit);
                }
            }
        }
        Collection::new(self.session.clone(), items)
    }

    /// Elements whose id is a member of `ids`.
    pub fn filter_ids(&self, ids: &[EntityId]) -> Self {
        self.filter(|e| ids.contains(&e.id()))
    }

    // Shared membership-filter shapes for the per-type impls below.

    fn filter_member_str(
        &self,
        allowed: &[&str],
        include_missing: bool,
        f: impl Fn(&T) -> Option<&str>,
    ) -> Self {
        self.filter(|e| match f(e) {
            Some(value) => allowed.contains(&value),
            None => include_missing,
        })
    }

    fn filter_member_copy<V: Copy + PartialEq>(
        &self,
        allowed: &[V],
        include_missing: bool,
        f: impl Fn(&T) -> Option<V>,
    ) -> Self {
        self.filter(|e| match f(e) {
            Some(value) => allowed.contains(&value),
            None => include_missing,
        })
    }
}

impl<T: Entity + NaturalOrder> Collection<T> {
    /// Stable sort by the entity type's natural order, returning a new
    /// collection. `reverse` flips the order of unequal elements only,
    /// so ties keep their original relative positions.
    pub fn sorted(&self, reverse: bool) -> Self {
        self.sorted_by(|a, b| {
            let ord = a.natural_cmp(b);
            if reverse {
                ord.reverse()
            } else {
                ord
            }
        })
    }

    /// Stable in-place variant of [`sorted`](Self::sorted).
    pub fn sort(&mut self, reverse: bool) {
        self.sort_by(|a, b| {
            let ord = a.natural_cmp(b);
            if reverse {
                ord.reverse()
            } else {
                ord
            }
        });
    }
}

impl<T> std::ops::Index<usize> for Collection<T> {
    type Output = Arc<T>;

    fn index(&self, index: usize) -> &Arc<T> {
        &self.items[index]
    }
}

impl<'a, T> IntoIterator for &'a Collection<T> {
    type Item = &'a Arc<T>;
    type IntoIter = std::slice::Iter<'a, Arc<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Identity keys of every element of `collection`.
fn reference_keys<U>(collection: &Collection<U>) -> HashSet<usize> {
    collection.items.iter().map(identity_key).collect()
}

// ============================================================================
// Per-type convenience accessors
// ============================================================================

impl Collection<Author> {
    pub fn names(&self) -> Vec<Option<String>> {
        self.items.iter().map(|a| a.name.clone()).collect()
    }

    pub fn wds(&self) -> Vec<Option<String>> {
        self.items.iter().map(|a| a.wd.clone()).collect()
    }

    pub fn urns(&self) -> Vec<Option<String>> {
        self.items.iter().map(|a| a.urn.clone()).collect()
    }

    pub fn filter_names(&self, names: &[&str], include_missing: bool) -> Self {
        self.filter_member_str(names, include_missing, |a| a.name.as_deref())
    }

    pub fn filter_wds(&self, wds: &[&str], include_missing: bool) -> Self {
        self.filter_member_str(wds, include_missing, |a| a.wd.as_deref())
    }

    pub fn filter_urns(&self, urns: &[&str], include_missing: bool) -> Self {
        self.filter_member_str(urns, include_missing, |a| a.urn.as_deref())
    }
}

impl Collection<Work> {
    pub fn titles(&self) -> Vec<Option<String>> {
        self.items.iter().map(|w| w.title.clone()).collect()
    }

    pub fn langs(&self) -> Vec<Option<String>> {
        self.items.iter().map(|w| w.lang.clone()).collect()
    }

    pub fn urns(&self) -> Vec<Option<String>> {
        self.items.iter().map(|w| w.urn.clone()).collect()
    }

    /// The authors of these works, deduplicated, first-seen order.
    pub fn authors(&self) -> Collection<Author> {
        self.flatten(|w| w.author.iter().cloned().collect())
    }

    pub fn filter_titles(&self, titles: &[&str], include_missing: bool) -> Self {
        self.filter_member_str(titles, include_missing, |w| w.title.as_deref())
    }

    pub fn filter_langs(&self, langs: &[&str], include_missing: bool) -> Self {
        self.filter_member_str(langs, include_missing, |w| w.lang.as_deref())
    }

    pub fn filter_urns(&self, urns: &[&str], include_missing: bool) -> Self {
        self.filter_member_str(urns, include_missing, |w| w.urn.as_deref())
    }

    /// Works whose author is one of `authors` (by identity).
    pub fn filter_authors(&self, authors: &Collection<Author>) -> Self {
        let keys = reference_keys(authors);
        self.filter(|w| {
            w.author
                .as_ref()
                .is_some_and(|a| keys.contains(&identity_key(a)))
        })
    }
}

impl Collection<Character> {
    pub fn names(&self) -> Vec<Option<String>> {
        self.items.iter().map(|c| c.name.clone()).collect()
    }

    pub fn genders(&self) -> Vec<Option<Gender>> {
        self.items.iter().map(|c| c.gender).collect()
    }

    pub fn beings(&self) -> Vec<Option<Being>> {
        self.items.iter().map(|c| c.being).collect()
    }

    pub fn numbers(&self) -> Vec<Option<Number>> {
        self.items.iter().map(|c| c.number).collect()
    }

    pub fn wds(&self) -> Vec<Option<String>> {
        self.items.iter().map(|c| c.wd.clone()).collect()
    }

    pub fn mantos(&self) -> Vec<Option<String>> {
        self.items.iter().map(|c| c.manto.clone()).collect()
    }

    pub fn filter_names(&self, names: &[&str], include_missing: bool) -> Self {
        self.filter_member_str(names, include_missing, |c| c.name.as_deref())
    }

    pub fn filter_genders(&self, genders: &[Gender], include_missing: bool) -> Self {
        self.filter_member_copy(genders, include_missing, |c| c.gender)
    }

    pub fn filter_beings(&self, beings: &[Being], include_missing: bool) -> Self {
        self.filter_member_copy(beings, include_missing, |c| c.being)
    }

    pub fn filter_numbers(&self, numbers: &[Number], include_missing: bool) -> Self {
        self.filter_member_copy(numbers, include_missing, |c| c.number)
    }

    pub fn filter_wds(&self, wds: &[&str], include_missing: bool) -> Self {
        self.filter_member_str(wds, include_missing, |c| c.wd.as_deref())
    }

    pub fn filter_mantos(&self, mantos: &[&str], include_missing: bool) -> Self {
        self.filter_member_str(mantos, include_missing, |c| c.manto.as_deref())
    }
}

impl Collection<CharacterInstance> {
    pub fn contexts(&self) -> Vec<Option<String>> {
        self.items.iter().map(|i| i.context.clone()).collect()
    }

    /// Resolved display names (contextual override, else the underlying
    /// character, else the context tag).
    pub fn names(&self) -> Vec<Option<String>> {
        self.items
            .iter()
            .map(|i| i.display_name().map(str::to_string))
            .collect()
    }

    /// Resolved genders, falling back to the underlying character.
    pub fn genders(&self) -> Vec<Option<Gender>> {
        self.items.iter().map(|i| i.gender()).collect()
    }

    pub fn beings(&self) -> Vec<Option<Being>> {
        self.items.iter().map(|i| i.being()).collect()
    }

    pub fn numbers(&self) -> Vec<Option<Number>> {
        self.items.iter().map(|i| i.number()).collect()
    }

    /// The underlying characters, deduplicated, first-seen order.
    /// Anonymous instances contribute nothing.
    pub fn characters(&self) -> Collection<Character> {
        self.flatten(|i| i.character.iter().cloned().collect())
    }

    pub fn filter_contexts(&self, contexts: &[&str], include_missing: bool) -> Self {
        self.filter_member_str(contexts, include_missing, |i| i.context.as_deref())
    }

    pub fn filter_names(&self, names: &[&str], include_missing: bool) -> Self {
        self.filter_member_str(names, include_missing, |i| i.display_name())
    }

    pub fn filter_genders(&self, genders: &[Gender], include_missing: bool) -> Self {
        self.filter_member_copy(genders, include_missing, |i| i.gender())
    }

    pub fn filter_beings(&self, beings: &[Being], include_missing: bool) -> Self {
        self.filter_member_copy(beings, include_missing, |i| i.being())
    }

    pub fn filter_numbers(&self, numbers: &[Number], include_missing: bool) -> Self {
        self.filter_member_copy(numbers, include_missing, |i| i.number())
    }

    /// Instances that are (or are not) anonymous.
    pub fn filter_anon(&self, anon: bool) -> Self {
        self.filter(|i| i.anon == anon)
    }

    /// Instances whose underlying character is one of `characters`.
    pub fn filter_characters(&self, characters: &Collection<Character>) -> Self {
        let keys = reference_keys(characters);
        self.filter(|i| {
            i.character
                .as_ref()
                .is_some_and(|c| keys.contains(&identity_key(c)))
        })
    }
}

impl Collection<SpeechCluster> {
    pub fn types(&self) -> Vec<Option<String>> {
        self.items.iter().map(|c| c.cluster_type.clone()).collect()
    }

    /// The works these clusters belong to, deduplicated.
    pub fn works(&self) -> Collection<Work> {
        self.flatten(|c| c.work.iter().cloned().collect())
    }

    pub fn filter_types(&self, types: &[&str], include_missing: bool) -> Self {
        self.filter_member_str(types, include_missing, |c| c.cluster_type.as_deref())
    }

    /// Clusters belonging to one of `works` (by identity).
    pub fn filter_works(&self, works: &Collection<Work>) -> Self {
        let keys = reference_keys(works);
        self.filter(|c| {
            c.work
                .as_ref()
                .is_some_and(|w| keys.contains(&identity_key(w)))
        })
    }
}

impl Collection<Speech> {
    pub fn seqs(&self) -> Vec<Option<u64>> {
        self.items.iter().map(|s| s.seq).collect()
    }

    pub fn first_lines(&self) -> Vec<Option<String>> {
        self.items.iter().map(|s| s.l_fi.clone()).collect()
    }

    pub fn last_lines(&self) -> Vec<Option<String>> {
        self.items.iter().map(|s| s.l_la.clone()).collect()
    }

    pub fn parts(&self) -> Vec<Option<u64>> {
        self.items.iter().map(|s| s.part).collect()
    }

    pub fn types(&self) -> Vec<Option<String>> {
        self.items.iter().map(|s| s.speech_type.clone()).collect()
    }

    /// The clusters of these speeches, deduplicated.
    pub fn clusters(&self) -> Collection<SpeechCluster> {
        self.flatten(|s| s.cluster.iter().cloned().collect())
    }

    /// The works of these speeches, deduplicated.
    pub fn works(&self) -> Collection<Work> {
        self.flatten(|s| s.work().cloned().into_iter().collect())
    }

    /// The authors of these speeches, deduplicated.
    pub fn authors(&self) -> Collection<Author> {
        self.flatten(|s| s.author().cloned().into_iter().collect())
    }

    /// Every speaker across these speeches, each instance once, in
    /// first-seen order. The elements are the same shared instances the
    /// speeches hold.
    pub fn speakers(&self) -> Collection<CharacterInstance> {
        self.flatten(|s| s.speakers.clone())
    }

    /// Every addressee across these speeches, deduplicated.
    pub fn addressees(&self) -> Collection<CharacterInstance> {
        self.flatten(|s| s.addressees.clone())
    }

    pub fn filter_types(&self, types: &[&str], include_missing: bool) -> Self {
        self.filter_member_str(types, include_missing, |s| s.speech_type.as_deref())
    }

    pub fn filter_seqs(&self, seqs: &[u64], include_missing: bool) -> Self {
        self.filter_member_copy(seqs, include_missing, |s| s.seq)
    }

    pub fn filter_parts(&self, parts: &[u64], include_missing: bool) -> Self {
        self.filter_member_copy(parts, include_missing, |s| s.part)
    }

    pub fn filter_first_lines(&self, loci: &[&str], include_missing: bool) -> Self {
        self.filter_member_str(loci, include_missing, |s| s.l_fi.as_deref())
    }

    pub fn filter_last_lines(&self, loci: &[&str], include_missing: bool) -> Self {
        self.filter_member_str(loci, include_missing, |s| s.l_la.as_deref())
    }

    pub fn filter_langs(&self, langs: &[&str], include_missing: bool) -> Self {
        self.filter_member_str(langs, include_missing, |s| s.lang())
    }

    /// Speeches whose cluster is one of `clusters` (by identity).
    pub fn filter_clusters(&self, clusters: &Collection<SpeechCluster>) -> Self {
        let keys = reference_keys(clusters);
        self.filter(|s| {
            s.cluster
                .as_ref()
                .is_some_and(|c| keys.contains(&identity_key(c)))
        })
    }

    /// Speeches delivered in one of `works` (by identity).
    pub fn filter_works(&self, works: &Collection<Work>) -> Self {
        let keys = reference_keys(works);
        self.filter(|s| s.work().is_some_and(|w| keys.contains(&identity_key(w))))
    }

    /// Speeches with at least one speaker among `instances`.
    pub fn filter_speaker_instances(&self, instances: &Collection<CharacterInstance>) -> Self {
        let keys = reference_keys(instances);
        self.filter(|s| s.speakers.iter().any(|i| keys.contains(&identity_key(i))))
    }

    /// Speeches with at least one speaker whose underlying character is
    /// among `characters`.
    pub fn filter_speakers(&self, characters: &Collection<Character>) -> Self {
        let keys = reference_keys(characters);
        self.filter(|s| {
            s.speakers.iter().any(|i| {
                i.character
                    .as_ref()
                    .is_some_and(|c| keys.contains(&identity_key(c)))
            })
        })
    }

    /// Speeches with at least one addressee among `instances`.
    pub fn filter_addressee_instances(&self, instances: &Collection<CharacterInstance>) -> Self {
        let keys = reference_keys(instances);
        self.filter(|s| s.addressees.iter().any(|i| keys.contains(&identity_key(i))))
    }

    /// Speeches with at least one addressee whose underlying character is
    /// among `characters`.
    pub fn filter_addressees(&self, characters: &Collection<Character>) -> Self {
        let keys = reference_keys(characters);
        self.filter(|s| {
            s.addressees.iter().any(|i| {
                i.character
                    .as_ref()
                    .is_some_and(|c| keys.contains(&identity_key(c)))
            })
        })
    }
}
