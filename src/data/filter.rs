use std::collections::{BTreeMap, BTreeSet};

use super::model::{MetadataValue, SimulationSet};

// ---------------------------------------------------------------------------
// Filter predicate: which unique values are selected per metadata column
// ---------------------------------------------------------------------------

/// Per-column selection state: maps column_name → set of selected values.
/// A column absent from the map places no constraint on samples.
pub type FilterState = BTreeMap<String, BTreeSet<MetadataValue>>;

/// Initialise a [`FilterState`] with every value selected.
pub fn init_filter_state(set: &SimulationSet) -> FilterState {
    set.unique_values.clone()
}

/// Return indices of samples that pass all active filters.
///
/// A sample passes a column filter when:
/// * the filter set for that column is non-empty, and
/// * every value of the column is selected, or the sample's value is
///   selected (a sample lacking the column counts as `Null`).
pub fn filtered_indices(set: &SimulationSet, filters: &FilterState) -> Vec<usize> {
    let active: Vec<(&String, &BTreeSet<MetadataValue>)> = filters
        .iter()
        .filter(|(col, selected)| {
            set.unique_values
                .get(*col)
                .map_or(true, |all| *selected != all)
        })
        .collect();

    set.samples
        .iter()
        .enumerate()
        .filter(|(_, sample)| {
            active.iter().all(|(col, selected)| {
                let value = sample.metadata.get(*col).unwrap_or(&MetadataValue::Null);
                selected.contains(value)
            })
        })
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::SimulationSample;
    use crate::spectrum::WavelengthGrid;

    fn set() -> SimulationSet {
        let tags = ["disk", "disk", "bulge", "torus"];
        let samples = tags
            .iter()
            .enumerate()
            .map(|(i, tag)| {
                let mut metadata = BTreeMap::new();
                metadata.insert("geometry".to_string(), MetadataValue::String(tag.to_string()));
                if i < 2 {
                    metadata.insert("batch".to_string(), MetadataValue::Integer(i as i64));
                }
                SimulationSample {
                    params: vec![i as f64],
                    attenuation: vec![0.0, 0.0],
                    stellar: vec![1.0, 1.0],
                    emission: vec![0.0, 0.0],
                    metadata,
                }
            })
            .collect();
        SimulationSet::from_samples(
            vec!["p".into()],
            WavelengthGrid::new(vec![1.0, 2.0]).unwrap(),
            WavelengthGrid::new(vec![10.0, 20.0]).unwrap(),
            samples,
        )
    }

    #[test]
    fn everything_selected_shows_everything() {
        let s = set();
        let filters = init_filter_state(&s);
        assert_eq!(filtered_indices(&s, &filters), vec![0, 1, 2, 3]);
    }

    #[test]
    fn deselecting_a_value_hides_its_samples() {
        let s = set();
        let mut filters = init_filter_state(&s);
        filters
            .get_mut("geometry")
            .unwrap()
            .remove(&MetadataValue::String("disk".into()));
        assert_eq!(filtered_indices(&s, &filters), vec![2, 3]);
    }

    #[test]
    fn empty_selection_hides_everything() {
        let s = set();
        let mut filters = init_filter_state(&s);
        filters.insert("geometry".into(), BTreeSet::new());
        assert!(filtered_indices(&s, &filters).is_empty());
    }

    #[test]
    fn missing_column_matches_null_only() {
        let s = set();
        let mut filters = init_filter_state(&s);
        filters.insert(
            "batch".into(),
            BTreeSet::from([MetadataValue::Integer(0)]),
        );
        assert_eq!(filtered_indices(&s, &filters), vec![0]);
        filters
            .get_mut("batch")
            .unwrap()
            .insert(MetadataValue::Null);
        assert_eq!(filtered_indices(&s, &filters), vec![0, 2, 3]);
    }
}
