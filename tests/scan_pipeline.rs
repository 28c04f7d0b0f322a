//! End-to-end scan behavior: snapshot visibility deciding which segments a
//! reader sees, composed with the predicate-pushdown filter reducing each
//! surviving batch.

use std::sync::{Arc, Mutex};

use arrow::{
    array::{Int64Array, StringArray},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use tundra::{
    ColumnStore, Diagram, ExecContext, Expr, FilterOperator, PhysicalOperator, Timestamp,
};

fn schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("value", DataType::Int64, false),
        Field::new("label", DataType::Utf8, false),
    ]))
}

fn batch(values: &[i64], labels: &[&str]) -> RecordBatch {
    RecordBatch::try_new(
        schema(),
        vec![
            Arc::new(Int64Array::from(values.to_vec())),
            Arc::new(StringArray::from(labels.to_vec())),
        ],
    )
    .expect("batch construction")
}

/// Terminal stage collecting everything pushed into it.
struct CollectSink {
    batches: Arc<Mutex<Vec<RecordBatch>>>,
}

impl PhysicalOperator for CollectSink {
    fn callback(
        &mut self,
        _ctx: &ExecContext,
        batch: RecordBatch,
    ) -> Result<(), tundra::EvalError> {
        self.batches.lock().unwrap().push(batch);
        Ok(())
    }

    fn finish(&mut self, _ctx: &ExecContext) -> Result<(), tundra::EvalError> {
        Ok(())
    }

    fn draw(&self) -> Diagram {
        Diagram {
            details: "Collect".to_string(),
            child: None,
        }
    }
}

/// Pushes every segment whose writer is visible at `snapshot` through the
/// filter, the way the scan layer drives a query.
fn scan(
    db: &tundra::Database,
    segments: &[(Timestamp, RecordBatch)],
    snapshot: Timestamp,
    filter: &mut FilterOperator,
) -> Vec<RecordBatch> {
    let collected = Arc::new(Mutex::new(Vec::new()));
    filter.set_next(Box::new(CollectSink {
        batches: Arc::clone(&collected),
    }));

    let ctx = ExecContext::new();
    for (handle, segment) in segments {
        if db.is_visible(*handle, snapshot) {
            filter.callback(&ctx, segment.clone()).expect("callback");
        }
    }
    filter.finish(&ctx).expect("finish");

    let collected = collected.lock().unwrap();
    collected.clone()
}

#[test]
fn snapshot_bounds_what_the_filter_sees() {
    let store = ColumnStore::new();
    let db = store.db("events");
    let mut segments = Vec::new();

    // Writer A begins first but commits last.
    let txn_a = db.begin_write();
    segments.push((txn_a.ts(), batch(&[1, 10], &["a1", "a2"])));
    let txn_b = db.begin_write();
    segments.push((txn_b.ts(), batch(&[20, 2], &["b1", "b2"])));

    txn_b.commit();
    let mid = db.begin_read();
    txn_a.commit();
    let late = db.begin_read();

    let mut filter = FilterOperator::compile(&Expr::column("value").gt(5_i64)).expect("compile");

    // The mid snapshot sees only B's segment; rows reduce to value > 5.
    let mid_result = scan(&db, &segments, mid.ts(), &mut filter);
    assert_eq!(mid_result.len(), 1);
    assert_eq!(mid_result[0], batch(&[20], &["b1"]));

    // The late snapshot sees both segments.
    let late_result = scan(&db, &segments, late.ts(), &mut filter);
    assert_eq!(late_result.len(), 2);
    assert_eq!(late_result[0], batch(&[10], &["a2"]));
    assert_eq!(late_result[1], batch(&[20], &["b1"]));
}

#[test]
fn in_flight_segment_is_invisible_and_nonmatching_batches_are_dropped() {
    let store = ColumnStore::new();
    let db = store.db("events");

    let committed = db.begin_write();
    let committed_segment = (committed.ts(), batch(&[100], &["keep"]));
    committed.commit();

    let stalled = db.begin_write();
    let stalled_segment = (stalled.ts(), batch(&[200], &["hidden"]));

    let snapshot = db.begin_read();
    let segments = vec![committed_segment, stalled_segment];

    // A predicate nothing satisfies drops batches without erroring.
    let mut rejecting =
        FilterOperator::compile(&Expr::column("value").lt(0_i64)).expect("compile");
    assert!(scan(&db, &segments, snapshot.ts(), &mut rejecting).is_empty());

    let mut matching =
        FilterOperator::compile(&Expr::column("value").gt_eq(0_i64)).expect("compile");
    let visible = scan(&db, &segments, snapshot.ts(), &mut matching);
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0], batch(&[100], &["keep"]));
    drop(stalled);
}

#[test]
fn pruned_transactions_stay_visible_to_later_snapshots() {
    let store = ColumnStore::new();
    let db = store.db("events");

    let txn = db.begin_write();
    let segment = (txn.ts(), batch(&[7], &["old"]));
    txn.commit();

    assert_eq!(db.prune(), 1);

    let snapshot = db.begin_read();
    let mut filter = FilterOperator::compile(&Expr::column("value").gt(0_i64)).expect("compile");
    let result = scan(&db, &[segment], snapshot.ts(), &mut filter);
    assert_eq!(result.len(), 1);
}

#[test]
fn filter_agrees_with_row_by_row_evaluation() {
    let rows: Vec<i64> = (0..256).map(|_| fastrand::i64(-50..50)).collect();
    let labels: Vec<String> = (0..256)
        .map(|i| if i % 3 == 0 { format!("evt_{i}") } else { format!("log_{i}") })
        .collect();
    let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
    let input = batch(&rows, &label_refs);

    let expr = Expr::column("value")
        .gt(0_i64)
        .and(Expr::column("label").matches("^evt_"));
    let mut filter = FilterOperator::compile(&expr).expect("compile");

    let collected = Arc::new(Mutex::new(Vec::new()));
    filter.set_next(Box::new(CollectSink {
        batches: Arc::clone(&collected),
    }));
    filter.callback(&ExecContext::new(), input).expect("callback");

    let expected: Vec<(i64, String)> = rows
        .iter()
        .zip(&labels)
        .filter(|(value, label)| **value > 0 && label.starts_with("evt_"))
        .map(|(value, label)| (*value, label.clone()))
        .collect();

    let collected = collected.lock().unwrap();
    if expected.is_empty() {
        assert!(collected.is_empty());
        return;
    }
    assert_eq!(collected.len(), 1);
    let reduced = &collected[0];
    assert_eq!(reduced.num_rows(), expected.len());

    let values = reduced
        .column_by_name("value")
        .unwrap()
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap();
    let labels_out = reduced
        .column_by_name("label")
        .unwrap()
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    for (row, (value, label)) in expected.iter().enumerate() {
        assert_eq!(values.value(row), *value);
        assert_eq!(labels_out.value(row), label.as_str());
    }
}
