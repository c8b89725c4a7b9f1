use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use time::{Date, Duration, Month, OffsetDateTime};
use unicode_normalization::UnicodeNormalization;

use dedupe_rs::candidate_selection::SortedNeighborhood;
use dedupe_rs::classifier::RuleBasedClassifier;
use dedupe_rs::clustering::{SequentialIds, TransitiveClosure};
use dedupe_rs::fusion::{resolutions, ConflictResolutionFusion, FieldAccessor, Merge};
use dedupe_rs::pipeline::{FusingOnlineDeduplication, OnlineDuplicateDetection};
use dedupe_rs::similarity::{
    equality, jaro_winkler, levenshtein, max_difference, max_of, weighted_average, SimilarityMeasureExt,
};
use dedupe_rs::sorting_key::{compose, SortingKey};

pub const PERSON_WINDOW_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gender {
    Female,
    Male,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<Gender>,
    pub birth_date: Option<Date>,
    pub source: Option<String>,
    pub last_modified: OffsetDateTime,
    pub fused_ids: BTreeSet<String>,
}

impl Person {
    pub fn empty() -> Self {
        Self {
            id: String::new(),
            first_name: None,
            last_name: None,
            gender: None,
            birth_date: None,
            source: None,
            last_modified: OffsetDateTime::UNIX_EPOCH,
            fused_ids: BTreeSet::new(),
        }
    }

    #[allow(dead_code)]
    pub fn new(id: &str, first_name: &str, last_name: &str, birth_date: Date) -> Self {
        Self {
            id: id.to_string(),
            first_name: Some(first_name.to_string()),
            last_name: Some(last_name.to_string()),
            birth_date: Some(birth_date),
            ..Self::empty()
        }
    }

    #[allow(dead_code)]
    pub fn without_fused_ids(&self) -> Self {
        Self {
            fused_ids: BTreeSet::new(),
            ..self.clone()
        }
    }
}

/// Lowercase, strip diacritics, drop parenthesized terms and punctuation.
pub fn normalize(value: &str) -> String {
    let mut depth = 0usize;
    value
        .to_lowercase()
        .nfd()
        .filter(|c| match c {
            '(' => {
                depth += 1;
                false
            }
            ')' => {
                depth = depth.saturating_sub(1);
                false
            }
            _ => depth == 0 && c.is_alphanumeric(),
        })
        .collect()
}

fn normalized(value: &Option<String>) -> Option<String> {
    value.as_deref().map(normalize)
}

pub fn person_candidate_selection() -> SortedNeighborhood<Person> {
    let built = SortedNeighborhood::builder()
        .default_window_size(PERSON_WINDOW_SIZE)
        .sorting_key(SortingKey::new("First name+Last name", |p: &Person| {
            compose(normalized(&p.first_name), normalized(&p.last_name))
        }))
        .sorting_key(SortingKey::new("Last name+First name", |p: &Person| {
            compose(normalized(&p.last_name), normalized(&p.first_name))
        }))
        .sorting_key(SortingKey::new("Bday+Last name", |p: &Person| {
            compose(p.birth_date, normalized(&p.last_name))
        }))
        .build();
    built.expect("valid person candidate selection")
}

fn name_similarity() -> impl dedupe_rs::similarity::SimilarityMeasure<str> {
    max_of(vec![levenshtein().cutoff(0.5).boxed(), jaro_winkler().boxed()])
}

pub fn person_classifier() -> RuleBasedClassifier<Person> {
    let birth_date_similarity = max_of(vec![
        levenshtein().of(|d: &Date| Some(d.to_string())).boxed(),
        max_difference(2.0, |a: &Date, b: &Date| (*a - *b).whole_days() as f64).boxed(),
    ]);
    let basic_comparison = weighted_average::<Person>()
        .add(2.0, name_similarity().of(|p: &Person| p.first_name.clone()))
        .add(2.0, name_similarity().of(|p: &Person| p.last_name.clone()))
        .add(1.0, equality::<Gender>().of(|p: &Person| p.gender))
        .add(2.0, birth_date_similarity.of(|p: &Person| p.birth_date))
        .build()
        .scale_with_threshold(0.9);

    RuleBasedClassifier::builder()
        .positive_rule("Basic comparison", basic_comparison)
        .build()
}

pub fn person_clustering() -> TransitiveClosure<u64, Person, String> {
    TransitiveClosure::new(|p: &Person| p.id.clone(), SequentialIds::new())
}

fn fused_ids_with_person_id(person: &Person) -> Option<BTreeSet<String>> {
    if person.fused_ids.is_empty() {
        return Some(BTreeSet::from([person.id.clone()]));
    }
    Some(person.fused_ids.clone())
}

pub fn person_fusion() -> ConflictResolutionFusion<Person> {
    let merge = Merge::builder(Person::empty)
        .field(FieldAccessor::new("id", |p: &Person| Some(p.id.clone()), |p: &mut Person, v| p.id = v))
        .with(resolutions::min())
        .field(FieldAccessor::new(
            "first_name",
            |p: &Person| p.first_name.clone(),
            |p: &mut Person, v| p.first_name = Some(v),
        ))
        .with(resolutions::longest())
        .then(resolutions::vote())
        .field(FieldAccessor::new(
            "last_name",
            |p: &Person| p.last_name.clone(),
            |p: &mut Person, v| p.last_name = Some(v),
        ))
        .corresponding_to_previous()
        .field(FieldAccessor::new("gender", |p: &Person| p.gender, |p: &mut Person, v| p.gender = Some(v)))
        .with(resolutions::assume_equal_value())
        .field(FieldAccessor::new(
            "birth_date",
            |p: &Person| p.birth_date,
            |p: &mut Person, v| p.birth_date = Some(v),
        ))
        .with(resolutions::vote())
        .then(resolutions::latest())
        .field(FieldAccessor::new(
            "last_modified",
            |p: &Person| Some(p.last_modified),
            |p: &mut Person, v| p.last_modified = v,
        ))
        .with(resolutions::max())
        .field(FieldAccessor::new("fused_ids", fused_ids_with_person_id, |p: &mut Person, v| p.fused_ids = v))
        .with(resolutions::union())
        .build()
        .expect("valid person merge");

    ConflictResolutionFusion::builder(merge)
        .source_extractor(|p: &Person| p.source.clone())
        .timestamp_extractor(|p: &Person| p.last_modified)
        .build()
}

#[allow(dead_code)]
pub fn person_detection() -> OnlineDuplicateDetection<u64, Person> {
    OnlineDuplicateDetection::new(person_candidate_selection(), person_classifier(), person_clustering())
}

#[allow(dead_code)]
pub fn person_deduplication() -> FusingOnlineDeduplication<u64, Person> {
    FusingOnlineDeduplication::new(person_detection(), person_fusion())
}

const FIRST_NAMES: [&str; 12] = [
    "Anna", "Bernd", "Chloé", "Dieter", "Elif", "Frank", "Greta", "Hannes", "Ines", "Jürgen", "Karla", "Lukas",
];
const LAST_NAMES: [&str; 10] = [
    "Müller", "Schmidt", "Schneider", "Fischer", "Weber", "Meyer", "Wagner", "Becker", "Schulz", "Hoffmann",
];
const SOURCES: [&str; 3] = ["crm", "erp", "web"];

#[derive(Debug, Clone)]
pub struct GeneratedDataset {
    pub records: Vec<Person>,
    /// Pairs of ids injected as duplicates, original id first
    #[allow(dead_code)]
    pub duplicate_pairs: Vec<(String, String)>,
}

/// Distinct people with a share of lightly perturbed duplicates mixed in.
pub fn generate_dataset(count: u32, duplicate_probability: f64, seed: u64) -> GeneratedDataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut records: Vec<Person> = Vec::with_capacity(count as usize);
    let mut duplicate_pairs = Vec::new();
    let epoch = OffsetDateTime::UNIX_EPOCH;

    for i in 1..=count {
        let id = format!("p{:06}", i);
        let source = SOURCES[rng.random_range(0..SOURCES.len())].to_string();
        let last_modified = epoch + Duration::days(i64::from(i));

        if !records.is_empty() && rng.random_bool(duplicate_probability) {
            let original = records[rng.random_range(0..records.len())].clone();
            let mut duplicate = Person {
                id: id.clone(),
                source: Some(source),
                last_modified,
                ..original.clone()
            };
            if rng.random_bool(0.5) {
                duplicate.first_name = original.first_name.as_deref().map(perturb);
            }
            duplicate_pairs.push((original.id, id));
            records.push(duplicate);
            continue;
        }

        let first_name = format!("{}{}", FIRST_NAMES[rng.random_range(0..FIRST_NAMES.len())], i);
        let last_name = LAST_NAMES[rng.random_range(0..LAST_NAMES.len())].to_string();
        let birth_date = Date::from_calendar_date(
            rng.random_range(1940..2005),
            Month::try_from(rng.random_range(1u8..=12)).unwrap_or(Month::January),
            rng.random_range(1..=28),
        )
        .ok();
        let gender = if rng.random_bool(0.5) { Gender::Female } else { Gender::Male };

        records.push(Person {
            id,
            first_name: Some(first_name),
            last_name: Some(last_name),
            gender: Some(gender),
            birth_date,
            source: Some(source),
            last_modified,
            fused_ids: BTreeSet::new(),
        });
    }

    GeneratedDataset {
        records,
        duplicate_pairs,
    }
}

/// Swap the last two characters; keeps the name within edit distance 2.
fn perturb(name: &str) -> String {
    let mut chars: Vec<char> = name.chars().collect();
    let len = chars.len();
    if len >= 2 {
        chars.swap(len - 1, len - 2);
    }
    chars.into_iter().collect()
}

#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
