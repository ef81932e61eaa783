//! Class balancing by oversampling.
//!
//! Minority classes are topped up with duplicates of their own rows, drawn
//! with replacement, until every class matches the most frequent one. Rows are
//! only ever appended.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::info;

use crate::dataset::annotations::AnnotationTable;

/// Occurrence count per class label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassBalanceTable {
    pub counts: BTreeMap<String, usize>,
}

impl ClassBalanceTable {
    pub fn from_table(table: &AnnotationTable) -> Self {
        Self {
            counts: table.class_counts(),
        }
    }

    pub fn max_count(&self) -> usize {
        self.counts.values().copied().max().unwrap_or(0)
    }

    /// Rows each class is missing to reach [`Self::max_count`]
    pub fn deficits(&self) -> BTreeMap<String, usize> {
        let max = self.max_count();
        self.counts
            .iter()
            .map(|(class, count)| (class.clone(), max - count))
            .collect()
    }

    pub fn is_balanced(&self) -> bool {
        self.deficits().values().all(|d| *d == 0)
    }
}

/// Oversample minority classes of `table`.
///
/// Classes are visited in label order and duplicates are chosen from `rng`,
/// so a seeded generator gives a reproducible result.
pub fn balance_classes<R: Rng + ?Sized>(table: &AnnotationTable, rng: &mut R) -> AnnotationTable {
    let balance = ClassBalanceTable::from_table(table);
    let mut records = table.records.clone();

    for (class, deficit) in balance.deficits() {
        if deficit == 0 {
            continue;
        }

        let candidates: Vec<usize> = table
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.class == class)
            .map(|(i, _)| i)
            .collect();

        for _ in 0..deficit {
            if let Some(&idx) = candidates.choose(rng) {
                records.push(table.records[idx].clone());
            }
        }

        info!("Oversampled '{}' with {} duplicate rows", class, deficit);
    }

    AnnotationTable::new(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::annotations::AnnotationRecord;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn record(class: &str, image_id: u32) -> AnnotationRecord {
        AnnotationRecord {
            filename: format!("{}.png", image_id),
            width: 100,
            height: 100,
            class: class.to_string(),
            xmin: image_id,
            ymin: 0,
            xmax: image_id + 10,
            ymax: 10,
            image_id,
        }
    }

    fn skewed_table() -> AnnotationTable {
        AnnotationTable::new(vec![
            record("ground-fixed", 0),
            record("ground-fixed", 1),
            record("ground-fixed", 2),
            record("ground-fixed", 3),
            record("ground-fixed", 4),
            record("carport-fixed", 5),
            record("carport-fixed", 6),
            record("rooftop-fixed", 7),
        ])
    }

    #[test]
    fn test_every_class_reaches_max_count() {
        let table = skewed_table();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let balanced = balance_classes(&table, &mut rng);

        let counts = balanced.class_counts();
        assert!(counts.values().all(|c| *c == 5));
        assert!(ClassBalanceTable::from_table(&balanced).is_balanced());
    }

    #[test]
    fn test_total_rows_is_original_plus_deficits() {
        let table = skewed_table();
        let deficit: usize = ClassBalanceTable::from_table(&table).deficits().values().sum();
        let balanced = balance_classes(&table, &mut ChaCha8Rng::seed_from_u64(1));

        assert_eq!(deficit, 3 + 4);
        assert_eq!(balanced.len(), table.len() + deficit);
    }

    #[test]
    fn test_original_rows_kept_in_place() {
        let table = skewed_table();
        let balanced = balance_classes(&table, &mut ChaCha8Rng::seed_from_u64(9));
        assert_eq!(&balanced.records[..table.len()], &table.records[..]);
    }

    #[test]
    fn test_duplicates_come_from_same_class() {
        let table = skewed_table();
        let balanced = balance_classes(&table, &mut ChaCha8Rng::seed_from_u64(3));
        for dup in &balanced.records[table.len()..] {
            assert!(table.records.contains(dup));
        }
    }

    #[test]
    fn test_seeded_rng_is_deterministic() {
        let table = skewed_table();
        let a = balance_classes(&table, &mut ChaCha8Rng::seed_from_u64(7));
        let b = balance_classes(&table, &mut ChaCha8Rng::seed_from_u64(7));
        assert_eq!(a, b);
    }

    #[test]
    fn test_balanced_input_unchanged() {
        let table = AnnotationTable::new(vec![record("ground-fixed", 0), record("carport-fixed", 1)]);
        let balanced = balance_classes(&table, &mut ChaCha8Rng::seed_from_u64(0));
        assert_eq!(balanced, table);
    }
}
