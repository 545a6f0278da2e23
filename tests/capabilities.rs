mod common;

use adaptive_dash::capabilities::{
    Role, RoleSource, detect_capabilities, detect_capabilities_with, schema_fingerprint,
};
use common::{FUNNEL_STAGES, daily_totals, dataset, stage_funnel};
use proptest::prelude::*;

#[test]
fn daily_totals_have_time_but_no_stages() {
    let data = daily_totals();
    let caps = detect_capabilities(&data.columns, &data.rows);
    assert!(caps.has_time);
    assert_eq!(caps.time_column.as_deref(), Some("dia"));
    assert_eq!(caps.stage_flags_count(), 0);
    assert_eq!(caps.metrics, vec!["leads_total", "venda_total"]);
    assert!(caps.dimensions.is_empty());
    assert_eq!(caps.row_count, 10);
}

#[test]
fn stage_columns_come_back_in_funnel_order() {
    let data = stage_funnel();
    // Reverse the header order; the vocabulary decides the funnel order.
    let mut reversed = data.columns.clone();
    reversed.reverse();
    let caps = detect_capabilities(&reversed, &data.rows);
    assert_eq!(caps.stage_flags, FUNNEL_STAGES.to_vec());
    assert_eq!(caps.dimensions, vec!["canal"]);
    assert_eq!(caps.role_of("st_venda"), Some(Role::StageFlag));
}

#[test]
fn stage_name_with_numeric_values_is_not_a_flag() {
    let data = dataset(
        &["st_venda", "origem"],
        vec![
            vec!["120".into(), "google".into()],
            vec!["95".into(), "meta".into()],
        ],
    );
    let caps = detect_capabilities(&data.columns, &data.rows);
    assert!(caps.stage_flags.is_empty());
    assert_eq!(caps.role_of("st_venda"), Some(Role::Metric));
    assert_eq!(caps.role_of("origem"), Some(Role::Dimension));
}

#[test]
fn unnamed_columns_fall_back_to_value_shapes() {
    let data = dataset(
        &["ref", "quando", "cor"],
        vec![
            vec![
                "550e8400-e29b-41d4-a716-446655440000".into(),
                "2024-03-01".into(),
                "azul".into(),
            ],
            vec![
                "6fa459ea-ee8a-3ca4-894e-db77e160355e".into(),
                "2024-03-02".into(),
                "verde".into(),
            ],
        ],
    );
    let caps = detect_capabilities(&data.columns, &data.rows);
    assert_eq!(caps.id_column.as_deref(), Some("ref"));
    assert_eq!(caps.time_column.as_deref(), Some("quando"));
    assert_eq!(caps.dimensions, vec!["cor"]);
    assert!(caps.columns.iter().all(|c| c.source == RoleSource::Values));
}

#[test]
fn sampling_limits_value_inspection_but_not_row_count() {
    let mut rows: Vec<Vec<String>> = (0..5).map(|_| vec!["1".to_string()]).collect();
    rows.extend((0..20).map(|idx| vec![format!("texto {idx}")]));
    let data = dataset(&["misc"], rows);
    let sampled = detect_capabilities_with(&data.columns, &data.rows, 5);
    assert_eq!(sampled.role_of("misc"), Some(Role::Metric));
    assert_eq!(sampled.row_count, 25);
    let full = detect_capabilities_with(&data.columns, &data.rows, 100);
    assert_eq!(full.role_of("misc"), Some(Role::Text));
}

#[test]
fn drift_is_detected_by_fingerprint() {
    let data = daily_totals();
    let caps = detect_capabilities(&data.columns, &data.rows);
    assert!(!caps.has_drifted(&["venda_total", "dia", "leads_total"]));
    assert!(caps.has_drifted(&["dia", "leads_total"]));
}

proptest! {
    #[test]
    fn fingerprint_ignores_column_order(
        mut names in proptest::collection::vec("[a-z_]{1,10}", 1..8),
        seed in any::<u64>()
    ) {
        let original = schema_fingerprint(&names);
        let len = names.len();
        names.rotate_left((seed as usize) % len);
        prop_assert_eq!(schema_fingerprint(&names), original);
    }

    #[test]
    fn every_column_gets_exactly_one_role(
        names in proptest::collection::btree_set("[a-z]{1,6}(_[a-z]{1,6})?", 1..10),
        values in proptest::collection::vec("[0-9a-z]{0,4}", 1..6)
    ) {
        let names: Vec<String> = names.into_iter().collect();
        let rows: Vec<Vec<String>> = values
            .iter()
            .map(|value| names.iter().map(|_| value.clone()).collect())
            .collect();
        let headers: Vec<&str> = names.iter().map(String::as_str).collect();
        let data = dataset(&headers, rows);
        let caps = detect_capabilities(&data.columns, &data.rows);
        prop_assert_eq!(caps.columns.len(), names.len());
        for name in &names {
            let listed = [
                caps.time_column.as_ref() == Some(name),
                caps.id_column.as_ref() == Some(name),
                caps.stage_flags.contains(name),
                caps.dimensions.contains(name),
                caps.metrics.contains(name),
                caps.currency_columns.contains(name),
                caps.percent_columns.contains(name),
            ]
            .iter()
            .filter(|hit| **hit)
            .count();
            prop_assert!(listed <= 1, "column {} listed {} times", name, listed);
        }
    }
}
