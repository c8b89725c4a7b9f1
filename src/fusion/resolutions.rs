//! Stock conflict resolution strategies.
//!
//! Strategies are partial: several values may survive, for example all
//! values tied for the maximum. Chain strategies until one value is left, or
//! let finalization report the remaining conflict.

use super::{AnnotatedValue, ConflictResolution, FusionContext, ResolutionTag, Source};
use crate::error::DedupeError;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

type Values<V> = Vec<AnnotatedValue<V>>;

/// All values equal to the smallest one.
pub fn min<V: PartialOrd + fmt::Debug>() -> impl ConflictResolution<V> {
    |values: Values<V>, _: &mut FusionContext| -> anyhow::Result<Values<V>> { extreme(values, Ordering::Less) }
}

/// All values equal to the largest one.
pub fn max<V: PartialOrd + fmt::Debug>() -> impl ConflictResolution<V> {
    |values: Values<V>, _: &mut FusionContext| -> anyhow::Result<Values<V>> { extreme(values, Ordering::Greater) }
}

fn extreme<V: PartialOrd + fmt::Debug>(values: Values<V>, wanted: Ordering) -> anyhow::Result<Values<V>> {
    let mut best = 0;
    for (index, candidate) in values.iter().enumerate().skip(1) {
        match candidate.value.partial_cmp(&values[best].value) {
            Some(ordering) if ordering == wanted => best = index,
            Some(_) => {}
            None => {
                return Err(DedupeError::IncomparableValues {
                    left: format!("{:?}", values[best].value),
                    right: format!("{:?}", candidate.value),
                }
                .into())
            }
        }
    }
    let Some(target) = values.get(best) else {
        return Ok(values);
    };
    let keep: Vec<bool> = values.iter().map(|v| v.value == target.value).collect();
    Ok(retain_flagged(values, &keep))
}

fn retain_flagged<V>(values: Values<V>, keep: &[bool]) -> Values<V> {
    values
        .into_iter()
        .zip(keep)
        .filter_map(|(value, keep)| keep.then_some(value))
        .collect()
}

/// Values whose key equals the smallest (`Ordering::Less`) or largest key.
fn keep_by_key<V, K: Ord>(values: Values<V>, key: impl Fn(&AnnotatedValue<V>) -> K, wanted: Ordering) -> Values<V> {
    let keys: Vec<K> = values.iter().map(&key).collect();
    let best = match wanted {
        Ordering::Less => keys.iter().min(),
        _ => keys.iter().max(),
    };
    let Some(best) = best else {
        return values;
    };
    let keep: Vec<bool> = keys.iter().map(|k| k == best).collect();
    retain_flagged(values, &keep)
}

/// Values with the most recent timestamp.
pub fn latest<V>() -> impl ConflictResolution<V> {
    |values: Values<V>, _: &mut FusionContext| -> anyhow::Result<Values<V>> {
        Ok(keep_by_key(values, |v| v.timestamp, Ordering::Greater))
    }
}

/// Values with the oldest timestamp.
pub fn earliest<V>() -> impl ConflictResolution<V> {
    |values: Values<V>, _: &mut FusionContext| -> anyhow::Result<Values<V>> {
        Ok(keep_by_key(values, |v| v.timestamp, Ordering::Less))
    }
}

/// Values with the most characters.
pub fn longest<V: AsRef<str>>() -> impl ConflictResolution<V> {
    |values: Values<V>, _: &mut FusionContext| -> anyhow::Result<Values<V>> {
        Ok(keep_by_key(values, |v| v.value.as_ref().chars().count(), Ordering::Greater))
    }
}

/// Values with the fewest characters.
pub fn shortest<V: AsRef<str>>() -> impl ConflictResolution<V> {
    |values: Values<V>, _: &mut FusionContext| -> anyhow::Result<Values<V>> {
        Ok(keep_by_key(values, |v| v.value.as_ref().chars().count(), Ordering::Less))
    }
}

/// Group equal values and keep the groups with the highest total weight.
fn keep_heaviest<V: PartialEq>(values: Values<V>, weight: impl Fn(&AnnotatedValue<V>) -> f64) -> Values<V> {
    let mut representatives: Vec<usize> = Vec::new();
    let mut totals: Vec<f64> = Vec::new();
    let mut group_of: Vec<usize> = Vec::with_capacity(values.len());
    for (index, value) in values.iter().enumerate() {
        let group = representatives
            .iter()
            .position(|&representative| values[representative].value == value.value);
        match group {
            Some(group) => {
                totals[group] += weight(value);
                group_of.push(group);
            }
            None => {
                representatives.push(index);
                totals.push(weight(value));
                group_of.push(totals.len() - 1);
            }
        }
    }
    let best = totals.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let keep: Vec<bool> = group_of.iter().map(|&group| totals[group] == best).collect();
    retain_flagged(values, &keep)
}

/// Values with the highest summed source weight; ties stay ambiguous.
pub fn vote<V: PartialEq>() -> impl ConflictResolution<V> {
    |values: Values<V>, _: &mut FusionContext| -> anyhow::Result<Values<V>> {
        Ok(keep_heaviest(values, |v| v.source.weight))
    }
}

/// Values occurring most often; ties stay ambiguous.
pub fn most_frequent<V: PartialEq>() -> impl ConflictResolution<V> {
    |values: Values<V>, _: &mut FusionContext| -> anyhow::Result<Values<V>> { Ok(keep_heaviest(values, |_| 1.0)) }
}

/// A single calculated set holding every element of every value.
pub fn union<E: Ord + Clone>() -> impl ConflictResolution<BTreeSet<E>> {
    |values: Values<BTreeSet<E>>, _: &mut FusionContext| -> anyhow::Result<Values<BTreeSet<E>>> {
        let merged: BTreeSet<E> = values.iter().flat_map(|v| v.value.iter().cloned()).collect();
        Ok(vec![AnnotatedValue::calculated(merged, &values)])
    }
}

/// Pass-through; differing values surface as a conflict when finalized.
pub fn assume_equal_value<V>() -> impl ConflictResolution<V> {
    |values: Values<V>, _: &mut FusionContext| -> anyhow::Result<Values<V>> { Ok(values) }
}

pub fn first<V>() -> impl ConflictResolution<V> {
    |values: Values<V>, _: &mut FusionContext| -> anyhow::Result<Values<V>> {
        Ok(values.into_iter().take(1).collect())
    }
}

pub fn last<V>() -> impl ConflictResolution<V> {
    |mut values: Values<V>, _: &mut FusionContext| -> anyhow::Result<Values<V>> {
        Ok(values.pop().into_iter().collect())
    }
}

/// Drop repeated values, keeping the first occurrence with its provenance.
pub fn distinct<V: PartialEq>() -> impl ConflictResolution<V> {
    |values: Values<V>, _: &mut FusionContext| -> anyhow::Result<Values<V>> {
        let mut unique: Values<V> = Vec::with_capacity(values.len());
        for value in values {
            if !unique.iter().any(|kept| kept.value == value.value) {
                unique.push(value);
            }
        }
        Ok(unique)
    }
}

/// The middle value, or both middle values for an even count.
pub fn median<V: PartialOrd + fmt::Debug>() -> impl ConflictResolution<V> {
    |mut values: Values<V>, _: &mut FusionContext| -> anyhow::Result<Values<V>> {
        let mut incomparable: Option<DedupeError> = None;
        values.sort_by(|left, right| {
            left.value.partial_cmp(&right.value).unwrap_or_else(|| {
                incomparable.get_or_insert_with(|| DedupeError::IncomparableValues {
                    left: format!("{:?}", left.value),
                    right: format!("{:?}", right.value),
                });
                Ordering::Equal
            })
        });
        if let Some(error) = incomparable {
            return Err(error.into());
        }
        let len = values.len();
        let range = if len % 2 == 1 {
            len / 2..len / 2 + 1
        } else {
            (len / 2).saturating_sub(1)..len / 2 + 1
        };
        Ok(values
            .into_iter()
            .enumerate()
            .filter_map(|(index, value)| range.contains(&index).then_some(value))
            .collect())
    }
}

/// Values of the highest-priority source present; unlisted sources rank last.
pub fn prefer_source<V>(priority: Vec<Source>) -> impl ConflictResolution<V> {
    move |values: Values<V>, _: &mut FusionContext| -> anyhow::Result<Values<V>> {
        let rank = |source: &Source| {
            priority
                .iter()
                .position(|preferred| preferred.name == source.name)
                .unwrap_or(usize::MAX)
        };
        let Some(best) = values.iter().map(|v| &v.source).min_by_key(|&source| rank(source)).cloned() else {
            return Ok(values);
        };
        Ok(values
            .into_iter()
            .filter(|v| v.source.name == best.name)
            .collect())
    }
}

/// Values whose source survived the resolution stored under `tag`.
pub fn corresponding<V>(tag: ResolutionTag) -> impl ConflictResolution<V> {
    move |values: Values<V>, context: &mut FusionContext| -> anyhow::Result<Values<V>> {
        let sources = context.retrieve_sources(&tag)?;
        Ok(values
            .into_iter()
            .filter(|v| sources.iter().any(|source| source.name == v.source.name))
            .collect())
    }
}

/// Map every value, keeping its provenance.
pub fn transform<I, O, F>(f: F) -> impl ConflictResolution<I, O>
where
    F: Fn(I) -> O + Send + Sync,
{
    move |values: Values<I>, _: &mut FusionContext| -> anyhow::Result<Values<O>> {
        Ok(values.into_iter().map(|v| v.map(&f)).collect())
    }
}

/// Calculated arithmetic mean.
pub fn mean<V: Copy + Into<f64>>() -> impl ConflictResolution<V, f64> {
    |values: Values<V>, _: &mut FusionContext| -> anyhow::Result<Values<f64>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let total: f64 = values.iter().map(|v| v.value.into()).sum();
        Ok(vec![AnnotatedValue::calculated(total / values.len() as f64, &values)])
    }
}

/// Calculated sum.
pub fn sum<V: Copy + Into<f64>>() -> impl ConflictResolution<V, f64> {
    |values: Values<V>, _: &mut FusionContext| -> anyhow::Result<Values<f64>> {
        let total: f64 = values.iter().map(|v| v.value.into()).sum();
        Ok(vec![AnnotatedValue::calculated(total, &values)])
    }
}
