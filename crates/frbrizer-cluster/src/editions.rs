use std::collections::BTreeMap;

use serde::Serialize;
use uuid::Uuid;

use crate::features::FeatureTable;

/// Records sharing one cluster label and one publication year.
/// `year` is 0 for the unknown-year bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditionGroup {
    pub year: i32,
    pub record_ids: Vec<Uuid>,
}

impl EditionGroup {
    pub fn publication_year(&self) -> Option<i32> {
        (self.year != 0).then_some(self.year)
    }
}

/// Groups rows by `(label, pub_date)`, ordered by year then by first member.
/// `labels` is aligned with `table.rows()`.
pub fn group_editions(table: &FeatureTable, labels: &[usize]) -> Vec<EditionGroup> {
    let mut buckets: BTreeMap<(usize, i32), Vec<Uuid>> = BTreeMap::new();
    for (row, label) in table.rows().iter().zip(labels) {
        buckets.entry((*label, row.pub_date)).or_default().push(row.uuid);
    }

    let mut groups: Vec<EditionGroup> = buckets
        .into_iter()
        .map(|((_, year), mut record_ids)| {
            record_ids.sort();
            EditionGroup { year, record_ids }
        })
        .collect();
    groups.sort_by(|a, b| a.year.cmp(&b.year).then(a.record_ids[0].cmp(&b.record_ids[0])));
    groups
}
