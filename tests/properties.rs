use health_report::{
    aggregate, classify, normalize, Band, Cell, GroupSpec, Ratio, RatioSpec, RawRecord, Schema,
};
use proptest::prelude::*;
use proptest::test_runner::Config;

const FACILITIES: [&str; 4] = ["Ahero", "Kisumu", "Nyando", "  "];

fn schema() -> Schema {
    Schema::new().measures(&["booked", "honored"]).dimension("facility")
}

fn spec() -> GroupSpec {
    GroupSpec::new(&["facility"])
        .measures(&["booked", "honored"])
        .ratio(RatioSpec::new("% Honored", "honored", "booked"))
}

fn count_cell() -> impl Strategy<Value = Cell> {
    prop_oneof![
        (0u32..500).prop_map(|n| Cell::Number(n as f64)),
        (0u32..500).prop_map(|n| Cell::Text(n.to_string())),
        Just(Cell::Missing),
        "[a-z]{1,6}".prop_map(Cell::Text),
    ]
}

fn any_cell() -> impl Strategy<Value = Cell> {
    prop_oneof![
        any::<f64>().prop_map(Cell::Number),
        ".{0,12}".prop_map(Cell::Text),
        Just(Cell::Missing),
    ]
}

fn records() -> impl Strategy<Value = Vec<RawRecord>> {
    let row = (0usize..FACILITIES.len(), count_cell(), count_cell());
    prop::collection::vec(row, 1..40).prop_map(|rows| {
        rows.into_iter()
            .map(|(f, booked, honored)| {
                let mut r = RawRecord::new();
                r.insert("facility".into(), Cell::from(FACILITIES[f]));
                r.insert("booked".into(), booked);
                r.insert("honored".into(), honored);
                r
            })
            .collect()
    })
}

proptest! {
    #![proptest_config(Config::with_cases(128))]

    #[test]
    fn normalizing_never_drops_rows(
        cells in prop::collection::vec((any_cell(), any_cell(), any_cell()), 0..40)
    ) {
        let records: Vec<RawRecord> = cells
            .into_iter()
            .map(|(f, b, h)| {
                let mut r = RawRecord::new();
                r.insert("facility".into(), f);
                r.insert("booked".into(), b);
                r.insert("honored".into(), h);
                r
            })
            .collect();
        let (rows, report) = normalize(&records, &schema()).unwrap();
        prop_assert_eq!(rows.len(), records.len());
        prop_assert_eq!(report.total_rows, records.len());
        for row in &rows {
            for v in row.measures.values().flatten() {
                prop_assert!(v.is_finite());
            }
        }
    }

    #[test]
    fn total_row_reconciles_with_groups(records in records()) {
        let (rows, _) = normalize(&records, &schema()).unwrap();
        let table = aggregate(&rows, &schema(), &spec()).unwrap();
        for m in &table.measures {
            let summed: f64 = table.groups.iter().filter_map(|g| g.measure(m)).sum();
            prop_assert_eq!(Some(summed), table.total.measure(m));
        }
        let counted: usize = table.groups.iter().map(|g| g.count).sum();
        prop_assert_eq!(counted, rows.len());
        prop_assert_eq!(table.total.count, rows.len());
    }

    #[test]
    fn group_ratios_are_ratios_of_sums(records in records()) {
        let (rows, _) = normalize(&records, &schema()).unwrap();
        let table = aggregate(&rows, &schema(), &spec()).unwrap();
        for group in table.rows() {
            let members: Vec<_> = rows
                .iter()
                .filter(|r| {
                    group.key[0] == "Total"
                        || r.dimension("facility") == Some(group.key[0].as_str())
                })
                .collect();
            let num: f64 = members.iter().map(|r| r.measure("honored").unwrap_or(0.0)).sum();
            let den: f64 = members.iter().map(|r| r.measure("booked").unwrap_or(0.0)).sum();
            let got = group.ratio("% Honored").unwrap();
            if den == 0.0 {
                prop_assert_eq!(got, Ratio::Undefined);
            } else {
                prop_assert_eq!(got, Ratio::Value(100.0 * num / den));
            }
        }
    }

    #[test]
    fn every_ratio_lands_in_one_band(v in -1.0e6f64..1.0e6) {
        let expected = if v >= 90.0 {
            Band::High
        } else if v >= 50.0 {
            Band::Medium
        } else {
            Band::Low
        };
        prop_assert_eq!(classify(Ratio::Value(v)), expected);
    }
}
