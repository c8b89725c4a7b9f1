#[path = "../src/test_support.rs"]
mod test_support;

use std::collections::BTreeSet;

use dedupe_rs::clustering::Cluster;
use dedupe_rs::pipeline::IncompleteFusions;
use test_support::{generate_dataset, init_tracing, person_deduplication, person_detection, Gender, Person};
use time::macros::{date, datetime};

fn customers() -> Vec<Person> {
    let modified = datetime!(2024-03-01 12:00 UTC);
    let mut joanna = Person::new("1", "Joanna", "Doe", date!(1990 - 01 - 01));
    joanna.gender = Some(Gender::Female);
    joanna.last_modified = modified;
    let mut peter = Person::new("2", "Peter", "Wiegand", date!(1967 - 07 - 19));
    peter.gender = Some(Gender::Male);
    peter.last_modified = modified;
    let mut ilse = Person::new("3", "Ilse", "Brandt", date!(1944 - 11 - 30));
    ilse.gender = Some(Gender::Female);
    ilse.last_modified = modified;
    vec![joanna, peter, ilse]
}

fn exact_duplicate(person: &Person) -> Person {
    Person {
        id: format!("d{}", person.id),
        ..person.clone()
    }
}

#[test]
fn distinct_customers_pass_through_unchanged() -> anyhow::Result<()> {
    init_tracing();
    let mut deduplication = person_deduplication();
    for customer in customers() {
        let deduplicated = deduplication.deduplicate(customer.clone())?;
        assert_eq!(deduplicated, customer);
    }
    Ok(())
}

#[test]
fn exact_duplicates_fuse_into_the_original() -> anyhow::Result<()> {
    init_tracing();
    let mut deduplication = person_deduplication();
    let customers = customers();
    deduplication.deduplicate_all(customers.clone())?;

    for customer in &customers {
        let duplicate = exact_duplicate(customer);
        let fused = deduplication.deduplicate(duplicate.clone())?;

        assert_ne!(fused, duplicate);
        assert_eq!(fused.without_fused_ids(), customer.without_fused_ids());
        let expected: BTreeSet<String> = [customer.id.clone(), duplicate.id].into_iter().collect();
        assert_eq!(fused.fused_ids, expected);
    }
    Ok(())
}

#[test]
fn typo_in_first_name_is_still_detected() -> anyhow::Result<()> {
    let mut detection = person_detection();
    let joanna = customers().remove(0);
    assert!(detection.detect_duplicates(&joanna)?.is_empty());

    let typo = Person {
        id: "7".to_string(),
        first_name: Some("Johanna".to_string()),
        ..joanna.clone()
    };
    let clusters: Vec<Cluster<u64, Person>> = detection.detect_duplicates(&typo)?;
    assert_eq!(clusters.len(), 1);
    assert!(clusters[0].contains(&joanna));
    assert!(clusters[0].contains(&typo));
    Ok(())
}

#[test]
fn different_people_with_same_name_stay_apart() -> anyhow::Result<()> {
    let mut detection = person_detection();
    let joanna = customers().remove(0);
    detection.detect_duplicates(&joanna)?;

    let namesake = Person {
        id: "8".to_string(),
        birth_date: Some(date!(1951 - 06 - 14)),
        gender: Some(Gender::Male),
        ..joanna
    };
    assert!(detection.detect_duplicates(&namesake)?.is_empty());
    Ok(())
}

#[test]
fn generated_duplicates_are_fused_with_their_originals() -> anyhow::Result<()> {
    init_tracing();
    let dataset = generate_dataset(400, 0.2, 42);
    assert!(!dataset.duplicate_pairs.is_empty());

    let mut deduplication =
        person_deduplication().with_incomplete_fusion_handler(IncompleteFusions::AcceptPartial);
    let deduplicated = deduplication.deduplicate_all(dataset.records.clone())?;
    assert_eq!(deduplicated.len(), dataset.records.len());

    for (original_id, duplicate_id) in &dataset.duplicate_pairs {
        let position = dataset
            .records
            .iter()
            .position(|record| &record.id == duplicate_id)
            .expect("duplicate is part of the dataset");
        let fused = &deduplicated[position];
        assert!(
            fused.fused_ids.contains(original_id) && fused.fused_ids.contains(duplicate_id),
            "{duplicate_id} was not fused with {original_id}: {:?}",
            fused.fused_ids
        );
    }
    Ok(())
}
