use std::cmp::Ordering;

use crate::models::{CellValue, ExecutionOutcome};

/// Absolute difference under which two numeric cells compare equal.
pub const ABSOLUTE_TOLERANCE: f64 = 1e-6;

/// Difference relative to the larger magnitude under which two numeric cells compare equal.
pub const RELATIVE_TOLERANCE: f64 = 1e-9;

/// Projected cells the column-mapping search may examine before it reports a mismatch.
pub const MAX_MAPPING_WORK: usize = 20_000_000;

type Row<'a> = Vec<&'a CellValue>;

/// Execution-accuracy match between a gold and a predicted outcome.
///
/// Both sides must have succeeded with the same number of columns. Rows are compared as
/// sets, so order and duplicates do not matter, and columns may appear in any order.
/// Numbers compare within [`ABSOLUTE_TOLERANCE`] or [`RELATIVE_TOLERANCE`], so `2`
/// equals `2.0`.
#[must_use]
pub fn results_match(gold: &ExecutionOutcome, predicted: &ExecutionOutcome) -> bool {
    match (gold, predicted) {
        (
            ExecutionOutcome::Success {
                columns: gold_columns,
                rows: gold_rows,
            },
            ExecutionOutcome::Success {
                columns: predicted_columns,
                rows: predicted_rows,
            },
        ) => {
            gold_columns.len() == predicted_columns.len()
                && row_sets_match(gold_columns.len(), gold_rows, predicted_rows)
        }
        _ => false,
    }
}

fn row_sets_match(width: usize, gold: &[Vec<CellValue>], predicted: &[Vec<CellValue>]) -> bool {
    if gold.iter().chain(predicted).any(|row| row.len() != width) {
        return false;
    }

    let identity = (0..width).collect::<Vec<_>>();
    let gold_rows = canonical_rows(gold, &identity);
    let predicted_rows = canonical_rows(predicted, &identity);
    if gold_rows.len() != predicted_rows.len() {
        return false;
    }
    if row_lists_equal(&gold_rows, &predicted_rows) {
        return true;
    }

    let gold_classes = column_classes(&gold_rows, width);
    let predicted_classes = column_classes(&predicted_rows, width);
    if !signatures_agree(&gold_classes, &predicted_classes) {
        return false;
    }

    // Most constrained gold classes first.
    let mut order = gold_classes
        .iter()
        .map(|gold_class| {
            let candidates = predicted_classes
                .iter()
                .enumerate()
                .filter(|(_, predicted_class)| gold_class.compatible(predicted_class))
                .map(|(index, _)| index)
                .collect::<Vec<_>>();
            (gold_class.representative, candidates)
        })
        .collect::<Vec<_>>();
    order.sort_by_key(|(_, candidates)| candidates.len());

    let mut search = MappingSearch {
        gold,
        predicted,
        order: &order,
        predicted_classes: &predicted_classes,
        used: vec![false; predicted_classes.len()],
        gold_columns: Vec::with_capacity(order.len()),
        predicted_columns: Vec::with_capacity(order.len()),
        work: 0,
    };
    let matched = search.extend();
    if search.exhausted() {
        tracing::warn!(
            width,
            rows = gold_rows.len(),
            work = search.work,
            "column mapping search exhausted; reporting mismatch"
        );
    }
    matched
}

/// Both sides must hold the same multiset of class signatures for any mapping to exist.
fn signatures_agree(gold: &[ColumnClass<'_>], predicted: &[ColumnClass<'_>]) -> bool {
    if gold.len() != predicted.len() {
        return false;
    }
    let mut gold = gold.iter().collect::<Vec<_>>();
    let mut predicted = predicted.iter().collect::<Vec<_>>();
    gold.sort_by(|left, right| left.signature_cmp(right));
    predicted.sort_by(|left, right| left.signature_cmp(right));
    gold.iter()
        .zip(&predicted)
        .all(|(left, right)| left.compatible(right))
}

/// Columns whose values agree on every row. Swapping two members never changes a row, so
/// a class is mapped as one unit through its representative.
struct ColumnClass<'a> {
    representative: usize,
    size: usize,
    sorted_values: Vec<&'a CellValue>,
}

impl ColumnClass<'_> {
    fn compatible(&self, other: &ColumnClass<'_>) -> bool {
        self.size == other.size
            && self.sorted_values.len() == other.sorted_values.len()
            && self
                .sorted_values
                .iter()
                .zip(&other.sorted_values)
                .all(|(left, right)| cells_equal(left, right))
    }

    fn signature_cmp(&self, other: &ColumnClass<'_>) -> Ordering {
        self.size
            .cmp(&other.size)
            .then_with(|| compare_rows(&self.sorted_values, &other.sorted_values))
    }
}

fn column_classes<'a>(rows: &[Row<'a>], width: usize) -> Vec<ColumnClass<'a>> {
    let mut classes: Vec<ColumnClass<'a>> = Vec::new();
    for column in 0..width {
        if let Some(class) = classes.iter_mut().find(|class| {
            rows.iter()
                .all(|row| cells_equal(row[class.representative], row[column]))
        }) {
            class.size += 1;
            continue;
        }

        let mut sorted_values = rows.iter().map(|row| row[column]).collect::<Vec<_>>();
        sorted_values.sort_by(|left, right| compare_cells(left, right));
        classes.push(ColumnClass {
            representative: column,
            size: 1,
            sorted_values,
        });
    }
    classes
}

/// Depth-first mapping of gold column classes onto predicted ones. A partial mapping is
/// only extended while the row sets projected onto the mapped columns still agree.
struct MappingSearch<'r, 'a> {
    gold: &'a [Vec<CellValue>],
    predicted: &'a [Vec<CellValue>],
    /// Gold representative column with the predicted classes it may map to.
    order: &'r [(usize, Vec<usize>)],
    predicted_classes: &'r [ColumnClass<'a>],
    used: Vec<bool>,
    gold_columns: Vec<usize>,
    predicted_columns: Vec<usize>,
    work: usize,
}

impl MappingSearch<'_, '_> {
    fn exhausted(&self) -> bool {
        self.work > MAX_MAPPING_WORK
    }

    fn extend(&mut self) -> bool {
        let order = self.order;
        let position = self.gold_columns.len();
        let Some((gold_column, candidates)) = order.get(position) else {
            return true;
        };

        for &candidate in candidates {
            if self.used[candidate] {
                continue;
            }
            self.work += (self.gold.len() + self.predicted.len()) * (position + 1);
            if self.exhausted() {
                return false;
            }

            self.gold_columns.push(*gold_column);
            self.predicted_columns
                .push(self.predicted_classes[candidate].representative);
            if self.projection_matches() {
                self.used[candidate] = true;
                if self.extend() {
                    return true;
                }
                self.used[candidate] = false;
            }
            self.gold_columns.pop();
            self.predicted_columns.pop();
            if self.exhausted() {
                return false;
            }
        }
        false
    }

    fn projection_matches(&self) -> bool {
        row_lists_equal(
            &canonical_rows(self.gold, &self.gold_columns),
            &canonical_rows(self.predicted, &self.predicted_columns),
        )
    }
}

/// Projects rows onto `columns`, sorts them and drops adjacent rows that compare equal.
fn canonical_rows<'a>(rows: &'a [Vec<CellValue>], columns: &[usize]) -> Vec<Row<'a>> {
    let mut projected = rows
        .iter()
        .map(|row| columns.iter().map(|&column| &row[column]).collect::<Row<'a>>())
        .collect::<Vec<_>>();
    projected.sort_by(|left, right| compare_rows(left, right));
    projected.dedup_by(|left, right| rows_equal(left, right));
    projected
}

fn row_lists_equal(left: &[Row<'_>], right: &[Row<'_>]) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .zip(right)
            .all(|(left, right)| rows_equal(left, right))
}

fn rows_equal(left: &[&CellValue], right: &[&CellValue]) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .zip(right)
            .all(|(left, right)| cells_equal(left, right))
}

fn compare_rows(left: &[&CellValue], right: &[&CellValue]) -> Ordering {
    left.iter()
        .zip(right)
        .map(|(left, right)| compare_cells(left, right))
        .find(|ordering| ordering.is_ne())
        .unwrap_or_else(|| left.len().cmp(&right.len()))
}

fn cell_rank(value: &CellValue) -> u8 {
    match value {
        CellValue::Null => 0,
        CellValue::Integer(_) | CellValue::Real(_) => 1,
        CellValue::Text(_) => 2,
        CellValue::Blob(_) => 3,
    }
}

fn as_number(value: &CellValue) -> Option<f64> {
    match value {
        #[allow(clippy::cast_precision_loss)]
        CellValue::Integer(value) => Some(*value as f64),
        CellValue::Real(value) => Some(*value),
        CellValue::Null | CellValue::Text(_) | CellValue::Blob(_) => None,
    }
}

/// Total order used to line rows up before the tolerant comparison.
fn compare_cells(left: &CellValue, right: &CellValue) -> Ordering {
    match (left, right) {
        (CellValue::Integer(left), CellValue::Integer(right)) => left.cmp(right),
        (CellValue::Text(left), CellValue::Text(right))
        | (CellValue::Blob(left), CellValue::Blob(right)) => left.cmp(right),
        _ => match (as_number(left), as_number(right)) {
            (Some(left), Some(right)) => left.total_cmp(&right),
            _ => cell_rank(left).cmp(&cell_rank(right)),
        },
    }
}

fn cells_equal(left: &CellValue, right: &CellValue) -> bool {
    match (left, right) {
        (CellValue::Null, CellValue::Null) => true,
        (CellValue::Integer(left), CellValue::Integer(right)) => left == right,
        (CellValue::Text(left), CellValue::Text(right))
        | (CellValue::Blob(left), CellValue::Blob(right)) => left == right,
        _ => match (as_number(left), as_number(right)) {
            (Some(left), Some(right)) => numbers_equal(left, right),
            _ => false,
        },
    }
}

fn numbers_equal(left: f64, right: f64) -> bool {
    if left == right || (left.is_nan() && right.is_nan()) {
        return true;
    }
    if !left.is_finite() || !right.is_finite() {
        return false;
    }
    let scale = left.abs().max(right.abs());
    (left - right).abs() <= ABSOLUTE_TOLERANCE.max(RELATIVE_TOLERANCE * scale)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{numbers_equal, results_match};
    use crate::models::{CellValue, ExecutionErrorKind, ExecutionOutcome};

    fn success(columns: &[&str], rows: Vec<Vec<CellValue>>) -> ExecutionOutcome {
        ExecutionOutcome::Success {
            columns: columns.iter().map(ToString::to_string).collect(),
            rows,
        }
    }

    fn text(value: &str) -> CellValue {
        CellValue::Text(value.to_string())
    }

    fn padded(leading: &[i64], nulls: usize) -> Vec<CellValue> {
        leading
            .iter()
            .map(|&value| CellValue::Integer(value))
            .chain(std::iter::repeat_n(CellValue::Null, nulls))
            .collect()
    }

    fn names(width: usize) -> Vec<String> {
        (0..width).map(|index| format!("c{index}")).collect()
    }

    #[test]
    fn row_and_column_order_do_not_matter() {
        let gold = success(
            &["name", "count"],
            vec![
                vec![text("EUR"), CellValue::Integer(1)],
                vec![text("CZK"), CellValue::Integer(2)],
            ],
        );
        let predicted = success(
            &["n", "currency"],
            vec![
                vec![CellValue::Integer(2), text("CZK")],
                vec![CellValue::Integer(1), text("EUR")],
            ],
        );
        assert!(results_match(&gold, &predicted));
    }

    #[test]
    fn column_permutation_must_keep_rows_together() {
        let gold = success(
            &["a", "b"],
            vec![
                vec![CellValue::Integer(1), CellValue::Integer(2)],
                vec![CellValue::Integer(2), CellValue::Integer(1)],
            ],
        );
        let predicted = success(
            &["a", "b"],
            vec![
                vec![CellValue::Integer(1), CellValue::Integer(1)],
                vec![CellValue::Integer(2), CellValue::Integer(2)],
            ],
        );
        assert!(!results_match(&gold, &predicted));
    }

    #[test]
    fn wide_results_with_identical_columns_compare_quickly() {
        let nulls = 14;
        let width = nulls + 2;
        let columns = names(width);
        let gold = ExecutionOutcome::Success {
            columns: columns.clone(),
            rows: vec![padded(&[1, 2], nulls), padded(&[2, 1], nulls)],
        };
        let mismatched = ExecutionOutcome::Success {
            columns: columns.clone(),
            rows: vec![padded(&[1, 1], nulls), padded(&[2, 2], nulls)],
        };
        let mut swapped_rows = vec![padded(&[2, 1], nulls), padded(&[1, 2], nulls)];
        for row in &mut swapped_rows {
            row.rotate_right(nulls / 2);
        }
        let swapped = ExecutionOutcome::Success {
            columns,
            rows: swapped_rows,
        };

        let started = Instant::now();
        assert!(!results_match(&gold, &mismatched));
        assert!(results_match(&gold, &swapped));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn flag_columns_with_one_extra_bit_are_rejected_quickly() {
        let width = 12;
        let flags = |shift: usize| -> Vec<Vec<CellValue>> {
            (0..width)
                .map(|row| {
                    (0..width)
                        .map(|column| CellValue::Integer(i64::from((row + column + shift) % width == 0)))
                        .collect()
                })
                .collect()
        };
        let gold = ExecutionOutcome::Success {
            columns: names(width),
            rows: flags(0),
        };
        let mut shifted = flags(3);
        shifted.reverse();
        let reordered = ExecutionOutcome::Success {
            columns: names(width),
            rows: shifted,
        };
        let mut broken_rows = flags(0);
        broken_rows[0][0] = CellValue::Integer(1);
        broken_rows[0][1] = CellValue::Integer(1);
        let broken = ExecutionOutcome::Success {
            columns: names(width),
            rows: broken_rows,
        };

        let started = Instant::now();
        assert!(results_match(&gold, &reordered));
        assert!(!results_match(&gold, &broken));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn floats_match_within_tolerance_and_integers_match_reals() {
        let gold = success(&["ratio"], vec![vec![CellValue::Real(0.333_333_333_3)]]);
        let predicted = success(&["ratio"], vec![vec![CellValue::Real(0.333_333_1)]]);
        assert!(results_match(&gold, &predicted));

        let gold = success(&["total"], vec![vec![CellValue::Integer(2)]]);
        let predicted = success(&["total"], vec![vec![CellValue::Real(2.0)]]);
        assert!(results_match(&gold, &predicted));

        let far = success(&["ratio"], vec![vec![CellValue::Real(0.3334)]]);
        assert!(!results_match(&success(&["ratio"], vec![vec![CellValue::Real(0.3333)]]), &far));
    }

    #[test]
    fn values_straddling_a_decimal_boundary_still_match() {
        let gold = success(&["share"], vec![vec![CellValue::Real(0.000_001_5)]]);
        let predicted = success(&["share"], vec![vec![CellValue::Real(0.000_001_499_999_9)]]);
        assert!(results_match(&gold, &predicted));

        let gold = success(&["total"], vec![vec![CellValue::Real(2.499_999_999_9)]]);
        let predicted = success(&["total"], vec![vec![CellValue::Real(2.500_000_000_1)]]);
        assert!(results_match(&gold, &predicted));
    }

    #[test]
    fn tolerance_scales_with_magnitude() {
        assert!(numbers_equal(1.0e12, 1.0e12 + 0.5));
        assert!(!numbers_equal(1.0e12, 1.0e12 + 5_000.0));
        assert!(!numbers_equal(0.0, 0.000_01));
        assert!(numbers_equal(f64::INFINITY, f64::INFINITY));
        assert!(!numbers_equal(f64::INFINITY, f64::MAX));
    }

    #[test]
    fn duplicates_collapse_and_nulls_compare_equal() {
        let gold = success(&["x"], vec![vec![CellValue::Null], vec![text("a")]]);
        let predicted = success(
            &["x"],
            vec![vec![text("a")], vec![CellValue::Null], vec![text("a")]],
        );
        assert!(results_match(&gold, &predicted));
    }

    #[test]
    fn different_column_counts_or_failures_never_match() {
        let gold = success(&["a"], vec![vec![CellValue::Integer(1)]]);
        let wider = success(
            &["a", "b"],
            vec![vec![CellValue::Integer(1), CellValue::Integer(1)]],
        );
        assert!(!results_match(&gold, &wider));

        let error = ExecutionOutcome::error(ExecutionErrorKind::Database, "boom");
        assert!(!results_match(&gold, &error));
        assert!(!results_match(&error, &error));
        assert!(!results_match(&gold, &ExecutionOutcome::Timeout { budget_ms: 1 }));
    }
}
