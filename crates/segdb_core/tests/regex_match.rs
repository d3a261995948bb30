//! Cross-segment regex match tests.

use proptest::prelude::*;
use segdb_core::{
    ColumnType, CompositeTable, Config, CoreError, DeletionBitmap, RegexDfa, Row, Schema, Segment,
    SegmentKind, Value, WritableBackendKind,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

fn schema() -> Schema {
    Schema::builder()
        .column("name", ColumnType::Str)
        .column("city", ColumnType::Str)
        .column("age", ColumnType::I64)
        .index("by_name", &["name"])
        .index("by_city_name", &["city", "name"])
        .index("by_age", &["age"])
        .build()
        .unwrap()
}

fn row(name: &str) -> Row {
    vec![Value::from(name), Value::from("x"), Value::I64(0)]
}

fn table() -> (TempDir, CompositeTable) {
    let dir = tempdir().unwrap();
    let config = Config::new().writable_backend(WritableBackendKind::Mock);
    let table = CompositeTable::with_schema(dir.path(), schema(), config);
    (dir, table)
}

fn run(table: &CompositeTable, pattern: &str) -> Vec<u64> {
    let mut ctx = table.create_db_context();
    let mut out = Vec::new();
    assert!(table
        .index_match_regex_str(0, pattern, "", &mut out, &mut ctx)
        .unwrap());
    out
}

#[test]
fn offsets_and_deletions_across_two_segments() {
    let (_dir, table) = table();

    let first: Vec<Row> = (0..100)
        .map(|i| match i {
            3 | 5 => row(&format!("hit-{i}")),
            _ => row(&format!("row-{i:03}")),
        })
        .collect();
    table
        .build_readonly_segment(first, DeletionBitmap::new())
        .unwrap();

    let second: Vec<Row> = (0..10)
        .map(|i| match i {
            2 => row("hit-deleted"),
            _ => row(&format!("other-{i}")),
        })
        .collect();
    table
        .build_readonly_segment(second, DeletionBitmap::from_ids(&[2]).unwrap())
        .unwrap();

    assert_eq!(table.row_base(), vec![0, 100]);
    assert_eq!(run(&table, "hit-.*"), vec![3, 5]);
}

#[test]
fn physical_order_is_translated() {
    let (_dir, table) = table();
    table
        .build_readonly_segment(
            vec![row("zed"), row("amy"), row("max")],
            DeletionBitmap::new(),
        )
        .unwrap();
    table
        .build_readonly_segment(vec![row("moe"), row("ann")], DeletionBitmap::new())
        .unwrap();

    // key order within each segment, segments in table order
    assert_eq!(run(&table, "(a|m).*"), vec![1, 2, 4, 3]);
}

#[test]
fn invalid_index_id_visits_nothing() {
    let (_dir, table) = table();
    table
        .build_readonly_segment(vec![row("a")], DeletionBitmap::new())
        .unwrap();
    let dfa = RegexDfa::compile(".*", "").unwrap();
    let mut ctx = table.create_db_context();
    let mut out = vec![42];

    let err = table
        .index_match_regex(3, &dfa, &mut out, &mut ctx)
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::InvalidIndexId {
            index_id: 3,
            index_count: 3
        }
    ));
    assert!(err.is_precondition());
    assert_eq!(out, vec![42]);
    assert_eq!(ctx.report().segments_matched, 0);
}

#[test]
fn composite_index_error_names_the_index() {
    let (_dir, table) = table();
    let mut ctx = table.create_db_context();
    let mut out = Vec::new();
    let err = table
        .index_match_regex_str(1, ".*", "", &mut out, &mut ctx)
        .unwrap_err();
    assert!(matches!(err, CoreError::CompositeIndex { index_id: 1, .. }));
    assert!(err.to_string().contains("by_city_name"));

    let err = table
        .index_match_regex_str(2, ".*", "", &mut out, &mut ctx)
        .unwrap_err();
    assert!(matches!(err, CoreError::NonStringIndex { index_id: 2, .. }));
}

#[test]
fn budget_exhaustion_drops_only_that_segment() {
    let (_dir, table) = table();
    table
        .build_readonly_segment(vec![row("a0"), row("a1")], DeletionBitmap::new())
        .unwrap();
    let big: Vec<Row> = (0..200).map(|i| row(&format!("b{i:03}"))).collect();
    table
        .build_readonly_segment(big, DeletionBitmap::new())
        .unwrap();

    let mut ctx = table.create_db_context();
    ctx.regex_match_mem_limit = 512;
    let mut out = Vec::new();
    assert!(table
        .index_match_regex_str(0, ".*", "", &mut out, &mut ctx)
        .unwrap());

    assert_eq!(out, vec![0, 1]);
    let report = ctx.report();
    assert_eq!(report.segments_matched, 1);
    assert_eq!(report.budget_exhausted.len(), 1);
    assert!(report.budget_exhausted[0].ends_with("rd-0001"));
    assert!(!report.is_complete());
}

#[test]
fn all_segments_exhausted_still_succeeds() {
    let (_dir, table) = table();
    table
        .build_readonly_segment(vec![row("a"), row("b")], DeletionBitmap::new())
        .unwrap();
    let mut ctx = table.create_db_context();
    ctx.regex_match_mem_limit = 0;
    let mut out = vec![9];
    assert!(table
        .index_match_regex_str(0, ".*", "", &mut out, &mut ctx)
        .unwrap());
    assert!(out.is_empty());
    assert_eq!(ctx.report().budget_exhausted.len(), 1);
}

#[test]
fn writable_segments_are_skipped() {
    let (_dir, table) = table();
    table
        .build_readonly_segment(vec![row("apple"), row("avocado")], DeletionBitmap::new())
        .unwrap();
    let before = run(&table, "a.*");

    table.new_writable_segment().unwrap();
    table.insert(row("apricot")).unwrap();
    table
        .build_readonly_segment(vec![row("banana")], DeletionBitmap::new())
        .unwrap();

    let mut ctx = table.create_db_context();
    let mut out = Vec::new();
    table
        .index_match_regex_str(0, "a.*", "", &mut out, &mut ctx)
        .unwrap();
    assert_eq!(out, before);
    assert_eq!(ctx.report().skipped_writable.len(), 1);
    assert!(ctx.report().skipped_writable[0].ends_with("wr-0001"));
    assert_eq!(ctx.report().segments_matched, 2);
}

#[test]
fn zero_matches_is_success() {
    let (_dir, table) = table();
    assert!(run(&table, "nothing").is_empty());
    table
        .build_readonly_segment(vec![row("a")], DeletionBitmap::new())
        .unwrap();
    table
        .build_readonly_segment(vec![row("b")], DeletionBitmap::new())
        .unwrap();
    assert!(run(&table, "nothing").is_empty());
}

#[test]
fn sink_is_cleared_and_calls_are_idempotent() {
    let (_dir, table) = table();
    table
        .build_readonly_segment(vec![row("aa"), row("ab"), row("b")], DeletionBitmap::new())
        .unwrap();
    let dfa = RegexDfa::compile("a.", "").unwrap();
    let mut ctx = table.create_db_context();
    let mut out = vec![100, 200, 300];

    table.index_match_regex(0, &dfa, &mut out, &mut ctx).unwrap();
    let first = out.clone();
    table.index_match_regex(0, &dfa, &mut out, &mut ctx).unwrap();
    assert_eq!(out, first);
    assert_eq!(out, vec![0, 1]);
}

#[test]
fn deletes_after_build_are_filtered() {
    let (_dir, table) = table();
    table
        .build_readonly_segment(vec![row("a1"), row("a2"), row("a3")], DeletionBitmap::new())
        .unwrap();
    assert!(table.delete(1).unwrap());
    assert_eq!(run(&table, "a.*"), vec![0, 2]);
}

#[test]
fn options_are_honored() {
    let (_dir, table) = table();
    table
        .build_readonly_segment(vec![row("Alpha"), row("beta")], DeletionBitmap::new())
        .unwrap();
    let mut ctx = table.create_db_context();
    let mut out = Vec::new();
    table
        .index_match_regex_str(0, "alpha", "i", &mut out, &mut ctx)
        .unwrap();
    assert_eq!(out, vec![0]);

    let err = table
        .index_match_regex_str(0, "alpha", "q", &mut out, &mut ctx)
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidRegexOption { option: 'q' }));
}

#[test]
fn matches_running_beside_writers_see_whole_segments() {
    const ROUNDS: usize = 40;
    let (_dir, table) = table();
    let done = AtomicBool::new(false);

    std::thread::scope(|s| {
        s.spawn(|| {
            for k in 0..ROUNDS {
                let i = table.new_writable_segment().unwrap();
                table.insert(row(&format!("miss-{k}-a"))).unwrap();
                table.insert(row(&format!("miss-{k}-b"))).unwrap();

                // seal the tail in place, same rows under the same ordinal
                let writable = table.segment(i).unwrap();
                let rows: Vec<Row> = (0..writable.logical_row_count())
                    .map(|l| writable.row(l).unwrap().unwrap())
                    .collect();
                let ordinal = table.segment_ordinal(i).unwrap();
                let mut sealed = table
                    .factory()
                    .create_readonly_segment(&table.segment_path(SegmentKind::Readonly, ordinal));
                sealed.build(rows, DeletionBitmap::new()).unwrap();
                table.replace_segment(i, Arc::new(sealed)).unwrap();

                table
                    .build_readonly_segment(
                        vec![row("miss"), row(&format!("hit-{k:03}"))],
                        DeletionBitmap::new(),
                    )
                    .unwrap();
            }
            done.store(true, Ordering::Release);
        });

        for _ in 0..3 {
            s.spawn(|| {
                let dfa = RegexDfa::compile("hit-.*", "").unwrap();
                let mut ctx = table.create_db_context();
                let mut out = Vec::new();
                let mut seen = 0;
                let mut last_bases: Vec<u64> = Vec::new();
                loop {
                    let finished = done.load(Ordering::Acquire);
                    assert!(table.index_match_regex(0, &dfa, &mut out, &mut ctx).unwrap());

                    assert!(out.windows(2).all(|w| w[0] < w[1]));
                    assert!(out.len() >= seen);
                    seen = out.len();
                    for (n, &id) in out.iter().enumerate() {
                        let found = table.get(id).unwrap().unwrap();
                        assert_eq!(found[0], Value::from(format!("hit-{n:03}")));
                    }

                    let bases = table.row_base();
                    assert!(bases.windows(2).all(|w| w[0] <= w[1]));
                    assert!(bases.starts_with(&last_bases));
                    last_bases = bases;
                    if finished {
                        break;
                    }
                }
                assert_eq!(seen, ROUNDS);
            });
        }
    });

    let expected: Vec<u64> = (0..ROUNDS as u64).flat_map(|k| [4 * k, 4 * k + 2]).collect();
    assert_eq!(table.row_base(), expected);
    assert_eq!(table.row_count(), 4 * ROUNDS as u64);
    assert!((0..table.segment_count()).all(|i| !table.segment(i).unwrap().is_writable()));
}

#[derive(Debug, Clone)]
struct SegmentSpec {
    names: Vec<String>,
    deleted: Vec<bool>,
    writable: bool,
}

fn segment_spec() -> impl Strategy<Value = SegmentSpec> {
    (prop::collection::vec(("[abc]{0,3}", any::<bool>()), 0..12), any::<bool>()).prop_map(
        |(rows, writable)| {
            let (names, deleted) = rows.into_iter().unzip();
            SegmentSpec {
                names,
                deleted,
                writable,
            }
        },
    )
}

const PATTERNS: &[&str] = &["a.*", ".*b", "(a|c)b?", "", "[bc]+", "abc", ".*"];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn results_are_exactly_the_live_readonly_matches(
        specs in prop::collection::vec(segment_spec(), 1..5),
        pattern in prop::sample::select(PATTERNS),
    ) {
        let (_dir, table) = table();
        for spec in &specs {
            if spec.writable {
                table.new_writable_segment().unwrap();
                for (i, name) in spec.names.iter().enumerate() {
                    let id = table.insert(row(name)).unwrap();
                    if spec.deleted[i] {
                        table.delete(id).unwrap();
                    }
                }
            } else {
                let rows = spec.names.iter().map(|n| row(n)).collect();
                let deleted: Vec<u64> = spec
                    .deleted
                    .iter()
                    .enumerate()
                    .filter(|(_, d)| **d)
                    .map(|(i, _)| i as u64)
                    .collect();
                table
                    .build_readonly_segment(rows, DeletionBitmap::from_ids(&deleted).unwrap())
                    .unwrap();
            }
        }

        let bases = table.row_base();
        for i in 1..bases.len() {
            let prev = table.segment(i - 1).unwrap();
            prop_assert_eq!(bases[i] - bases[i - 1], prev.logical_row_count());
        }

        let dfa = RegexDfa::compile(pattern, "").unwrap();
        let mut ctx = table.create_db_context();
        let mut out = Vec::new();
        prop_assert!(table.index_match_regex(0, &dfa, &mut out, &mut ctx).unwrap());

        let mut expected = BTreeSet::new();
        for (i, spec) in specs.iter().enumerate() {
            if spec.writable {
                continue;
            }
            for (logical, name) in spec.names.iter().enumerate() {
                if !spec.deleted[logical] && dfa.is_full_match(name.as_bytes()) {
                    expected.insert(bases[i] + logical as u64);
                }
            }
        }
        let got: BTreeSet<u64> = out.iter().copied().collect();
        prop_assert_eq!(got.len(), out.len());
        prop_assert_eq!(&got, &expected);

        for &id in &out {
            let (i, logical) = table.locate(id).unwrap();
            let segment = table.segment(i).unwrap();
            prop_assert!(!segment.is_writable());
            prop_assert!(!segment.is_deleted(logical));
        }

        let mut again = Vec::new();
        table.index_match_regex(0, &dfa, &mut again, &mut ctx).unwrap();
        prop_assert_eq!(again, out);
    }
}
