// Matrix expansion properties: product size, determinism and filter order independence

use pipeline_engine::execution::matrix::MatrixExpander;
use pipeline_engine::parser::models::{
    Axis, AxisValues, Dimensions, Job, MatrixConfig, MatrixFilter, MatrixScalar,
};
use pipeline_engine::ResolvedParameters;

use proptest::prelude::*;
use std::collections::{BTreeSet, HashSet};

const AXES: [&str; 4] = ["os", "pyver", "arch", "tier"];

fn job(axes: &[Vec<String>], filters: Vec<MatrixFilter>) -> Job {
    let dimensions = axes
        .iter()
        .enumerate()
        .map(|(i, values)| Axis {
            name: AXES[i].to_string(),
            values: AxisValues::List(values.iter().map(|v| MatrixScalar(v.clone())).collect()),
        })
        .collect();

    Job {
        job: "Unit".to_string(),
        allow_empty_matrix: true,
        matrix: Some(MatrixConfig {
            dimensions: Dimensions(dimensions),
            filters,
            ..MatrixConfig::default()
        }),
        ..Job::default()
    }
}

fn names(job: &Job) -> Vec<String> {
    MatrixExpander::expand(job, &ResolvedParameters::default(), &[])
        .unwrap()
        .into_iter()
        .map(|instance| instance.name)
        .collect()
}

/// One to four axes, each with one to four distinct values
fn axes() -> impl Strategy<Value = Vec<Vec<String>>> {
    prop::collection::vec(
        prop::collection::btree_set("[a-z][a-z0-9]{0,3}", 1..=4)
            .prop_map(|values: BTreeSet<String>| values.into_iter().collect::<Vec<_>>()),
        1..=4,
    )
}

/// A filter on one of the axes keeping a subset of its values
fn filter(axes: &[Vec<String>]) -> impl Strategy<Value = MatrixFilter> {
    let axes = axes.to_vec();
    (0..axes.len()).prop_flat_map(move |i| {
        let values = axes[i].clone();
        prop::sample::subsequence(values.clone(), 0..=values.len())
            .prop_map(move |kept| MatrixFilter::new(AXES[i], kept))
    })
}

fn axes_with_filters() -> impl Strategy<Value = (Vec<Vec<String>>, MatrixFilter, MatrixFilter)> {
    axes().prop_flat_map(|axes| {
        let first = filter(&axes);
        let second = filter(&axes);
        (Just(axes), first, second)
    })
}

proptest! {
    #[test]
    fn unfiltered_expansion_is_the_full_product(axes in axes()) {
        let expanded = names(&job(&axes, Vec::new()));
        let expected: usize = axes.iter().map(Vec::len).product();

        prop_assert_eq!(expanded.len(), expected);
        let unique: HashSet<&String> = expanded.iter().collect();
        prop_assert_eq!(unique.len(), expected);
    }

    #[test]
    fn expansion_is_deterministic(axes in axes()) {
        let job = job(&axes, Vec::new());
        prop_assert_eq!(names(&job), names(&job));
    }

    #[test]
    fn filter_order_does_not_matter((axes, first, second) in axes_with_filters()) {
        let forward = names(&job(&axes, vec![first.clone(), second.clone()]));
        let backward = names(&job(&axes, vec![second, first]));
        prop_assert_eq!(forward, backward);
    }
}

#[test]
fn first_axis_varies_slowest() {
    let job = job(
        &[
            vec!["linux".to_string(), "windows".to_string()],
            vec!["3.9".to_string(), "3.12".to_string()],
        ],
        Vec::new(),
    );
    assert_eq!(
        names(&job),
        vec![
            "Unit[os=linux,pyver=3.9]",
            "Unit[os=linux,pyver=3.12]",
            "Unit[os=windows,pyver=3.9]",
            "Unit[os=windows,pyver=3.12]",
        ]
    );
}
