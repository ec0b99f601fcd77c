//! End-to-end population: an in-memory template plus a small recordset,
//! checked cell by cell.

use chrono::NaiveDate;
use platereport_common::{MeasurementRow, MeasurementType};
use platereport_engine::{
    CalibrationPlacement, PopulatorConfig, TemplateBook, TemplateCell, TemplateRegion, populate,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn standard(plate: &str, sample: &str, quantity: f64, ct: f64, day: NaiveDate) -> MeasurementRow {
    let mut row = MeasurementRow::new("N1", sample, plate, MeasurementType::Standard);
    row.ct = Some(ct);
    row.raw_ct = format!("{ct}");
    row.standard_quantity = Some(quantity);
    row.analysis_date = Some(day);
    row
}

fn unknown(plate: &str, sample: &str, ct: f64, day: NaiveDate) -> MeasurementRow {
    let mut row = MeasurementRow::new("N1", sample, plate, MeasurementType::Unknown);
    row.ct = Some(ct);
    row.raw_ct = format!("{ct}");
    row.analysis_date = Some(day);
    row
}

/// Standards on an exact line: ct = intercept + slope * log10(q).
fn plate_standards(
    plate: &str,
    slope: f64,
    intercept: f64,
    day: NaiveDate,
) -> Vec<MeasurementRow> {
    [1000.0f64, 100.0, 10.0]
        .iter()
        .map(|&q| {
            let ct = intercept + slope * q.log10();
            standard(plate, &format!("STD-{q}"), q, ct, day)
        })
        .collect()
}

fn template() -> TemplateBook {
    let mut book = TemplateBook::new();

    let mut main = TemplateRegion::new("main");
    main.set_col_roles(&[&["label"], &["ct"], &["curve"], &["slope"]]);
    main.push_row(
        &["banner"],
        vec![TemplateCell::text(
            "qPCR Report {group.date};__MERGETO(slope)",
        )],
    );
    main.push_row(
        &["header"],
        vec![
            TemplateCell::text("Sample"),
            TemplateCell::text("Ct"),
            TemplateCell::text("Curve"),
            TemplateCell::text("Slope"),
        ],
    );
    main.push_row(
        &["data"],
        vec![
            TemplateCell::text("{sample.id}"),
            TemplateCell::text("{qpcr.ctavg:.2f}"),
            TemplateCell::text("{sample.curveid}"),
            TemplateCell::text("=__GETCALVAL(slope)"),
        ],
    );
    book.add_region(main);

    let mut cal = TemplateRegion::new("calibration");
    cal.set_col_roles(&[&["sample"], &["sq"], &["logsq"], &["ct"]]);
    cal.push_row(&["banner"], vec![TemplateCell::text("Curve {cal.id}")]);
    cal.push_row(
        &["header"],
        vec![
            TemplateCell::text("Standard"),
            TemplateCell::text("SQ"),
            TemplateCell::text("log SQ"),
            TemplateCell::text("Ct"),
        ],
    );
    cal.push_row(
        &["data", "point"],
        vec![
            TemplateCell::text("{sample.id}"),
            TemplateCell::text("{cal.sq}"),
            TemplateCell::text("{cal.logsq:.4f}"),
            TemplateCell::text("{qpcr.ctavg:.2f}"),
        ],
    );
    cal.push_row(
        &["footer"],
        vec![
            TemplateCell::text("Slope"),
            TemplateCell::text("=SLOPE(__GETRANGE(point,ct),__GETRANGE(point,logsq))"),
        ],
    );
    book.add_region(cal);
    book
}

fn two_plate_records() -> Vec<MeasurementRow> {
    let day = date(2024, 3, 5);
    let mut rows = Vec::new();
    rows.push(unknown("P1", "U-1", 32.0, day));
    rows.push(unknown("P1", "U-2", 33.0, day));
    rows.push(unknown("P2", "U-3", 34.0, day));
    rows.push(unknown("P2", "U-4", 35.0, day));
    rows.extend(plate_standards("P1", -3.3, 40.0, day));
    rows.extend(plate_standards("P2", -3.6, 41.0, day));
    rows
}

fn sheet_snapshot(
    book: &platereport_engine::OutputBook,
    title: &str,
) -> Vec<((u32, u32), String)> {
    let id = book.by_title(title).unwrap();
    let sheet = book.sheet(id).unwrap();
    let mut cells: Vec<((u32, u32), String)> = sheet
        .cells()
        .map(|(&coord, cell)| (coord, cell.value.to_string()))
        .collect();
    cells.sort();
    cells
}

#[test]
fn one_group_two_plates() {
    let template = template();
    let records = two_plate_records();
    let out = populate(&template, &records, &PopulatorConfig::default()).unwrap();

    assert_eq!(out.summary.groups, 1);
    assert_eq!(out.summary.data_rows, 4);
    assert_eq!(out.summary.curves_fitted, 2);
    assert_eq!(out.summary.dropped_unknown_rows, 0);
    assert!(out.summary.skipped_curves.is_empty());

    let main_id = out.book.by_title("Main").unwrap();
    let main = out.book.sheet(main_id).unwrap();
    assert_eq!(main.text(1, 1), "qPCR Report 2024-03-05");
    assert_eq!(main.text(2, 1), "Sample");
    assert_eq!(main.text(3, 1), "U-1");
    assert_eq!(main.text(3, 2), "32");
    assert_eq!(main.text(3, 3), "Cal-N1-P1");
    assert_eq!(main.text(5, 1), "U-3");
    assert_eq!(main.text(5, 3), "Cal-N1-P2");

    // The banner merged rightwards through the column tagged `slope`.
    assert!(main.merges().iter().any(|m| m.a1() == "A1:D1"));

    // The deferred lookup resolves each row against its own plate's curve.
    for (row, sample, expected) in [
        (3, "U-1", -3.3),
        (4, "U-2", -3.3),
        (5, "U-3", -3.6),
        (6, "U-4", -3.6),
    ] {
        assert_eq!(main.text(row, 1), sample);
        let text = main.text(row, 4);
        let slope: f64 = text.strip_prefix('=').unwrap().parse().unwrap();
        assert!((slope - expected).abs() < 1e-9, "row {row}: {text}");
    }
}

#[test]
fn calibration_blocks_stack_on_the_shared_sheet() {
    let template = template();
    let records = two_plate_records();
    let out = populate(&template, &records, &PopulatorConfig::default()).unwrap();

    let cal_id = out.book.by_title("Cal").unwrap();
    let cal = out.book.sheet(cal_id).unwrap();

    // First curve: banner, header, three points, footer.
    assert_eq!(cal.text(1, 1), "Curve Cal-N1-P1");
    assert_eq!(cal.text(2, 4), "Ct");
    assert_eq!(cal.text(3, 1), "STD-1000");
    assert_eq!(cal.text(3, 2), "1000");
    // "3.0000" casts to a number and displays without padding.
    assert_eq!(cal.text(3, 3), "3");
    assert_eq!(cal.text(3, 4), "30.1");
    assert_eq!(cal.text(5, 1), "STD-10");
    assert_eq!(cal.text(6, 1), "Slope");
    assert_eq!(cal.text(6, 2), "=SLOPE('Cal'!D3:D5,'Cal'!C3:C5)");

    // Second curve appends below with one spacer row.
    assert_eq!(cal.text(8, 1), "Curve Cal-N1-P2");
    assert_eq!(cal.text(10, 1), "STD-1000");
    assert_eq!(cal.text(10, 4), "30.2");
    assert_eq!(cal.text(13, 2), "=SLOPE('Cal'!D10:D12,'Cal'!C10:C12)");
}

#[test]
fn population_is_deterministic() {
    let template = template();
    let records = two_plate_records();
    let config = PopulatorConfig::default();
    let a = populate(&template, &records, &config).unwrap();
    let b = populate(&template, &records, &config).unwrap();
    assert_eq!(sheet_snapshot(&a.book, "Main"), sheet_snapshot(&b.book, "Main"));
    assert_eq!(sheet_snapshot(&a.book, "Cal"), sheet_snapshot(&b.book, "Cal"));
    assert_eq!(a.rows, b.rows);
}

#[test]
fn groups_split_on_analysis_date_and_pull_in_standards() {
    let template = template();
    let d1 = date(2024, 3, 5);
    let d2 = date(2024, 3, 12);
    let mut records = Vec::new();
    records.push(unknown("P1", "U-1", 32.0, d1));
    records.extend(plate_standards("P1", -3.3, 40.0, d1));
    // Second run has no standards of its own; its unknowns borrow the
    // closest-dated curve.
    records.push(unknown("P3", "U-9", 33.0, d2));

    let out = populate(&template, &records, &PopulatorConfig::default()).unwrap();
    assert_eq!(out.summary.groups, 2);
    // The borrowed curve is fitted again inside the second group.
    assert_eq!(out.summary.curves_fitted, 2);

    let borrowed = out
        .rows
        .iter()
        .find(|r| r.sample_id == "U-9")
        .and_then(|r| r.standard_curve_id.clone());
    assert_eq!(borrowed.as_deref(), Some("Cal-N1-P1"));

    let main_id = out.book.by_title("Main").unwrap();
    let main = out.book.sheet(main_id).unwrap();
    assert_eq!(main.text(1, 1), "qPCR Report 2024-03-05");
    assert_eq!(main.text(3, 1), "U-1");
    // Two spacer rows after the first group's last row.
    assert_eq!(main.text(6, 1), "qPCR Report 2024-03-12");
    assert_eq!(main.text(8, 1), "U-9");
    assert_eq!(main.text(8, 3), "Cal-N1-P1");
}

#[test]
fn mandatory_same_plate_drops_orphan_unknowns() {
    let template = template();
    let day = date(2024, 3, 5);
    let mut records = Vec::new();
    records.push(unknown("P1", "U-1", 32.0, day));
    records.push(unknown("P9", "U-orphan", 33.0, day));
    records.extend(plate_standards("P1", -3.3, 40.0, day));

    let config = PopulatorConfig {
        require_curve_on_same_plate: true,
        ..Default::default()
    };
    let out = populate(&template, &records, &config).unwrap();
    assert_eq!(out.summary.dropped_unknown_rows, 1);
    assert_eq!(out.summary.data_rows, 1);
    assert!(out.rows.iter().all(|r| r.sample_id != "U-orphan"));
}

#[test]
fn hidden_placement_discards_calibration_sheets() {
    let template = template();
    let records = two_plate_records();
    let config = PopulatorConfig {
        calibration_placement: CalibrationPlacement::Hidden,
        ..Default::default()
    };
    let out = populate(&template, &records, &config).unwrap();

    let cal_id = out.book.by_title("Cal").unwrap();
    assert!(out.book.sheet(cal_id).unwrap().discarded);
    assert!(!out.book.sheet(out.book.by_title("Main").unwrap()).unwrap().discarded);

    // Curve lookups still resolve, as literal values.
    let main = out.book.sheet(out.book.by_title("Main").unwrap()).unwrap();
    let slope: f64 = main.text(3, 4).strip_prefix('=').unwrap().parse().unwrap();
    assert!((slope + 3.3).abs() < 1e-9);
}

#[test]
fn per_curve_placement_gets_a_sheet_per_curve() {
    let template = template();
    let records = two_plate_records();
    let config = PopulatorConfig {
        calibration_placement: CalibrationPlacement::PerCurveSheet,
        ..Default::default()
    };
    let out = populate(&template, &records, &config).unwrap();

    let p1 = out.book.by_title("Cal-N1-P1").unwrap();
    let p2 = out.book.by_title("Cal-N1-P2").unwrap();
    assert_eq!(out.book.sheet(p1).unwrap().text(1, 1), "Curve Cal-N1-P1");
    assert_eq!(out.book.sheet(p2).unwrap().text(1, 1), "Curve Cal-N1-P2");
    // Ranges in the footer formula point at the curve's own sheet.
    assert_eq!(
        out.book.sheet(p1).unwrap().text(6, 2),
        "=SLOPE('Cal-N1-P1'!D3:D5,'Cal-N1-P1'!C3:C5)"
    );
}

#[test]
fn too_few_points_skips_the_curve_but_keeps_the_layout() {
    let template = template();
    let day = date(2024, 3, 5);
    let mut records = Vec::new();
    records.push(unknown("P1", "U-1", 32.0, day));
    records.push(standard("P1", "STD-100", 100.0, 33.4, day));
    records.push(standard("P1", "STD-10", 10.0, 36.7, day));

    let config = PopulatorConfig {
        min_curve_points: 3,
        ..Default::default()
    };
    let out = populate(&template, &records, &config).unwrap();
    assert_eq!(out.summary.curves_fitted, 0);
    assert_eq!(out.summary.skipped_curves.len(), 1);
    assert_eq!(out.summary.skipped_curves[0].id, "Cal-N1-P1");

    // The block is still written so the raw points remain visible.
    let cal = out.book.sheet(out.book.by_title("Cal").unwrap()).unwrap();
    assert_eq!(cal.text(1, 1), "Curve Cal-N1-P1");
    assert_eq!(cal.text(3, 1), "STD-100");

    // Without a fitted curve the lookup falls back to the default argument
    // when one exists; here there is none, so the error text lands in the
    // cell.
    let main = out.book.sheet(out.book.by_title("Main").unwrap()).unwrap();
    assert!(main.text(3, 4).contains("slope"));
}

#[test]
fn registered_curve_cells_resolve_as_addresses() {
    let mut book = TemplateBook::new();
    let mut main = TemplateRegion::new("main");
    main.set_col_roles(&[&["label"], &["slope"]]);
    main.push_row(
        &["data"],
        vec![
            TemplateCell::text("{sample.id}"),
            TemplateCell::text("=__GETCALVAL(slope)"),
        ],
    );
    book.add_region(main);
    let mut cal = TemplateRegion::new("calibration");
    cal.set_col_roles(&[&["sample"], &["logsq"], &["ct"]]);
    cal.push_row(
        &["data", "point"],
        vec![
            TemplateCell::text("{sample.id}"),
            TemplateCell::text("{cal.logsq}"),
            TemplateCell::text("{qpcr.ctavg}"),
        ],
    );
    cal.push_row(
        &["footer"],
        vec![
            TemplateCell::text("Slope"),
            TemplateCell::text("{cal.slope};__SETCELL(slope)"),
        ],
    );
    book.add_region(cal);

    let day = date(2024, 3, 5);
    let mut records = vec![unknown("P1", "U-1", 32.0, day)];
    records.extend(plate_standards("P1", -3.3, 40.0, day));

    // The footer registers its slope cell, so the main-row lookup resolves
    // to the anchored cross-sheet address instead of the literal value.
    let out = populate(&book, &records, &PopulatorConfig::default()).unwrap();
    let main = out.book.sheet(out.book.by_title("Main").unwrap()).unwrap();
    assert_eq!(main.text(1, 1), "U-1");
    assert_eq!(main.text(1, 2), "='Cal'!$B$4");
    let cal_sheet = out.book.sheet(out.book.by_title("Cal").unwrap()).unwrap();
    let stored: f64 = cal_sheet.text(4, 2).parse().unwrap();
    assert!((stored + 3.3).abs() < 1e-9);

    // Hidden placement forces the literal value even with the named cell.
    let config = PopulatorConfig {
        calibration_placement: CalibrationPlacement::Hidden,
        ..Default::default()
    };
    let out = populate(&book, &records, &config).unwrap();
    let main = out.book.sheet(out.book.by_title("Main").unwrap()).unwrap();
    let slope: f64 = main.text(1, 2).strip_prefix('=').unwrap().parse().unwrap();
    assert!((slope + 3.3).abs() < 1e-9);
}

#[test]
fn provenance_points_at_the_backing_rows() {
    let template = template();
    let records = two_plate_records();
    let out = populate(&template, &records, &PopulatorConfig::default()).unwrap();

    let main = out.book.sheet(out.book.by_title("Main").unwrap()).unwrap();
    // U-1 is record 0.
    let cell = main.cell(3, 1).unwrap();
    assert_eq!(cell.sources, vec![0]);
    assert_eq!(out.rows[0].sample_id, "U-1");

    // The first curve point of Cal-N1-P1 comes from the STD-1000 record.
    let cal = out.book.sheet(out.book.by_title("Cal").unwrap()).unwrap();
    let point = cal.cell(3, 1).unwrap();
    assert_eq!(point.sources.len(), 1);
    assert_eq!(out.rows[point.sources[0]].sample_id, "STD-1000");
    assert_eq!(
        out.rows[point.sources[0]].measurement_type,
        MeasurementType::Standard
    );
}

#[test]
fn missing_main_region_is_an_error() {
    let book = TemplateBook::new();
    let err = populate(&book, &[], &PopulatorConfig::default()).unwrap_err();
    assert!(err.to_string().contains("main"));
}
