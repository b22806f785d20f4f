use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;

use quake_core::{
    AggregationStore, CanonicalRecord, Config, DateWindow, ExportMode, ExportPlan, Exporter,
    FetchError, FetchOutcome, PartitionKey, QuakeSource, RawRecord, ResumePoint, WriteMode,
};

/// In-memory source: a fixed number of quakes per window, some windows failing.
#[derive(Debug, Default)]
struct ScriptedSource {
    per_window: HashMap<DateWindow, usize>,
    failing: HashSet<DateWindow>,
    blank_text: bool,
    calls: Mutex<Vec<DateWindow>>,
}

impl ScriptedSource {
    fn with_counts(counts: &[(DateWindow, usize)]) -> Self {
        Self {
            per_window: counts.iter().copied().collect(),
            ..Self::default()
        }
    }

    fn failing(mut self, window: DateWindow) -> Self {
        self.failing.insert(window);
        self
    }

    fn with_blank_text(mut self) -> Self {
        self.blank_text = true;
        self
    }

    fn calls(&self) -> Vec<DateWindow> {
        self.calls.lock().unwrap().clone()
    }
}

fn raw_quake(window: &DateWindow, index: usize) -> RawRecord {
    let day = window.first_day() + chrono::Duration::days(index as i64 % 28);
    serde_json::from_value(json!({
        "time": format!("{day}T{:02}:30:00Z", index % 24),
        "latitude": 16.0 + index as f64 * 0.1,
        "longitude": 96.0,
        "depth": 10.0 + index as f64,
        "mag": 3.5,
        "location": format!("Site {index}"),
        "country": "Myanmar",
    }))
    .unwrap()
}

#[async_trait]
impl QuakeSource for ScriptedSource {
    async fn fetch(&self, window: &DateWindow) -> FetchOutcome {
        self.calls.lock().unwrap().push(*window);

        // Later windows finish first, so completion order differs from submission.
        let delay = 40u64.saturating_sub(window.month() as u64 * 3);
        tokio::time::sleep(Duration::from_millis(delay)).await;

        if self.failing.contains(window) {
            return FetchOutcome::Failed(FetchError::Shape("simulated outage".to_string()));
        }

        let count = self.per_window.get(window).copied().unwrap_or(0);
        if count == 0 {
            return FetchOutcome::Empty(quake_core::source::EmptyReason::EmptyList);
        }

        let mut raw: Vec<RawRecord> = (0..count).map(|i| raw_quake(window, i)).collect();
        // One exact duplicate and one out-of-range record per window.
        raw.push(raw[0].clone());
        let mut bad = raw_quake(window, 0);
        bad.0.insert("mag".into(), json!(12.0));
        raw.push(bad);

        if self.blank_text {
            for record in &mut raw {
                record.0.insert("location".into(), json!(""));
                record.0.insert("country".into(), json!(""));
            }
        }
        FetchOutcome::Records(raw)
    }
}

fn month(year: i32, month: u32) -> DateWindow {
    DateWindow::new(year, month).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.export.dir = dir.to_path_buf();
    config.export.start_year = 2023;
    config.export.workers = 3;
    config
}

async fn run(
    config: &Config,
    source: Arc<ScriptedSource>,
    mode: ExportMode,
    cutoff: NaiveDate,
) -> (ExportPlan, quake_core::ExportSummary) {
    let exporter = Exporter::from_config(config, source, cutoff).unwrap();
    let plan = ExportPlan::build(mode, exporter.store(), config.export.start_year, cutoff);
    let summary = exporter.run(&plan).await.unwrap();
    (plan, summary)
}

fn assert_forms_match(store: &AggregationStore, key: &PartitionKey) -> Vec<CanonicalRecord> {
    let rows = store.read_partition(key).unwrap();
    assert_eq!(store.read_json_partition(key).unwrap(), rows, "forms differ for {key}");
    rows
}

#[tokio::test]
async fn failed_window_does_not_stop_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let counts = [
        (month(2023, 1), 2),
        (month(2023, 2), 3),
        (month(2023, 3), 4),
        (month(2023, 4), 5),
    ];
    let source = Arc::new(ScriptedSource::with_counts(&counts).failing(month(2023, 3)));

    let (plan, summary) = run(&config, source.clone(), ExportMode::Incremental, date(2023, 5, 1)).await;

    assert_eq!(plan.windows.len(), 4);
    let mut calls = source.calls();
    calls.sort();
    assert_eq!(calls, plan.windows, "every window attempted exactly once");

    assert_eq!(summary.windows_completed, 4);
    assert_eq!(summary.failed_windows.len(), 1);
    assert_eq!(summary.failed_windows[0].window, month(2023, 3));
    assert!(summary.failed_windows[0].cause.contains("simulated outage"));
    assert_eq!(summary.records_valid, 2 + 3 + 5);
    assert_eq!(summary.rejections.duplicate, 3);
    assert_eq!(summary.rejections.out_of_bounds, 3);

    let store = AggregationStore::new(dir.path());
    let combined = assert_forms_match(&store, &PartitionKey::Combined);
    assert_eq!(combined.len(), 2 + 3 + 5);
    assert!(!store.csv_path(&PartitionKey::Month(month(2023, 3))).exists());
}

#[tokio::test]
async fn every_monthly_record_appears_in_its_year_and_combined() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let counts = [
        (month(2023, 11), 3),
        (month(2023, 12), 2),
        (month(2024, 1), 0),
        (month(2024, 2), 4),
    ];
    let source = Arc::new(ScriptedSource::with_counts(&counts));

    // Nothing before November: seed the store so the run resumes there.
    let store = AggregationStore::new(dir.path());
    let seed = Arc::new(ScriptedSource::with_counts(&[(month(2023, 10), 1)]));
    run(&config, seed, ExportMode::Full, date(2023, 11, 1)).await;
    assert!(matches!(store.resume_point(), ResumePoint::Resume { .. }));

    let (plan, summary) = run(&config, source, ExportMode::Incremental, date(2024, 3, 1)).await;
    assert_eq!(plan.windows, counts.iter().map(|(w, _)| *w).collect::<Vec<_>>());
    assert_eq!(summary.empty_windows, 1);
    assert_eq!(summary.years_written, vec![2023, 2024]);

    let combined = assert_forms_match(&store, &PartitionKey::Combined);
    for (window, count) in counts {
        let monthly = assert_forms_match(&store, &PartitionKey::Month(window));
        assert_eq!(monthly.len(), count);

        let yearly = assert_forms_match(&store, &PartitionKey::Year(window.year()));
        for record in &monthly {
            assert!(yearly.contains(record), "{window} record missing from yearly");
            assert!(combined.contains(record), "{window} record missing from combined");
        }
    }

    // October from the seeding run plus this run's nine.
    assert_eq!(combined.len(), 1 + 9);
    let times: Vec<_> = combined.iter().map(|r| r.time_utc).collect();
    let mut sorted = times.clone();
    sorted.sort();
    assert_eq!(times, sorted, "combined output is chronological by window");
}

#[tokio::test]
async fn second_incremental_run_only_fetches_new_months() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let counts = [
        (month(2023, 1), 1),
        (month(2023, 2), 2),
        (month(2023, 3), 3),
        (month(2023, 4), 4),
    ];

    let first = Arc::new(ScriptedSource::with_counts(&counts));
    let (plan, _) = run(&config, first, ExportMode::Incremental, date(2023, 3, 1)).await;
    assert_eq!(plan.resume, Some(ResumePoint::Fresh));
    assert_eq!(plan.windows, vec![month(2023, 1), month(2023, 2)]);

    let second = Arc::new(ScriptedSource::with_counts(&counts));
    let (plan, summary) =
        run(&config, second.clone(), ExportMode::Incremental, date(2023, 5, 1)).await;
    assert_eq!(plan.windows, vec![month(2023, 3), month(2023, 4)]);
    assert_eq!(summary.records_valid, 7);

    let mut calls = second.calls();
    calls.sort();
    assert_eq!(calls, vec![month(2023, 3), month(2023, 4)]);

    let store = AggregationStore::new(dir.path());
    assert_eq!(assert_forms_match(&store, &PartitionKey::Combined).len(), 10);
    assert_eq!(assert_forms_match(&store, &PartitionKey::Year(2023)).len(), 10);

    // Already up to date: nothing planned, nothing written.
    let third = Arc::new(ScriptedSource::with_counts(&counts));
    let (plan, summary) = run(&config, third.clone(), ExportMode::Incremental, date(2023, 5, 1)).await;
    assert!(plan.windows.is_empty());
    assert_eq!(summary.windows_completed, 0);
    assert!(third.calls().is_empty());
    assert_eq!(store.read_partition(&PartitionKey::Combined).unwrap().len(), 10);
}

#[tokio::test]
async fn full_export_rerun_rewrites_instead_of_duplicating() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let counts = [(month(2023, 1), 2), (month(2023, 2), 3)];

    for _ in 0..2 {
        let source = Arc::new(ScriptedSource::with_counts(&counts));
        let (plan, summary) = run(&config, source, ExportMode::Full, date(2023, 3, 1)).await;
        assert_eq!(plan.resume, None);
        assert_eq!(summary.combined_written, 5);
    }

    let store = AggregationStore::new(dir.path());
    assert_eq!(assert_forms_match(&store, &PartitionKey::Combined).len(), 5);
    assert_eq!(assert_forms_match(&store, &PartitionKey::Year(2023)).len(), 5);
    assert_eq!(
        assert_forms_match(&store, &PartitionKey::Month(month(2023, 2))).len(),
        3
    );
}

#[tokio::test]
async fn unreadable_combined_dataset_is_rebuilt_without_duplicates() {
    let counts = [
        (month(2023, 1), 2),
        (month(2023, 2), 3),
        (month(2023, 3), 4),
    ];

    // A header with no rows reads as empty; a ragged row does not read at all.
    for corrupt in ["garbage\n", "garbage\nnot,a,row\n"] {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let store = AggregationStore::new(dir.path());

        let first = Arc::new(ScriptedSource::with_counts(&counts));
        run(&config, first, ExportMode::Incremental, date(2023, 3, 1)).await;
        std::fs::write(store.csv_path(&PartitionKey::Combined), corrupt).unwrap();

        let second = Arc::new(ScriptedSource::with_counts(&counts));
        let (plan, summary) =
            run(&config, second, ExportMode::Incremental, date(2023, 4, 1)).await;
        assert!(matches!(
            plan.resume,
            Some(ResumePoint::Fresh | ResumePoint::Recovered { .. })
        ));
        assert_eq!(plan.write_mode, WriteMode::Rewrite);
        assert_eq!(
            plan.windows,
            vec![month(2023, 1), month(2023, 2), month(2023, 3)]
        );
        assert_eq!(summary.combined_written, 9);

        for (window, count) in counts {
            assert_eq!(
                assert_forms_match(&store, &PartitionKey::Month(window)).len(),
                count,
                "{window} rewritten, not appended"
            );
        }
        assert_eq!(assert_forms_match(&store, &PartitionKey::Year(2023)).len(), 9);
        assert_eq!(assert_forms_match(&store, &PartitionKey::Combined).len(), 9);

        let resume = store.resume_point();
        assert!(matches!(resume, ResumePoint::Resume { .. }), "{corrupt:?}: {resume:?}");

        // Healed: the next run is an ordinary up-to-date incremental one.
        let third = Arc::new(ScriptedSource::with_counts(&counts));
        let (plan, _) = run(&config, third.clone(), ExportMode::Incremental, date(2023, 4, 1)).await;
        assert_eq!(plan.write_mode, WriteMode::Append);
        assert!(plan.windows.is_empty());
        assert!(third.calls().is_empty());
    }
}

#[tokio::test]
async fn full_rerun_keeps_failed_month_in_every_level() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let counts = [(month(2023, 1), 2), (month(2023, 2), 3)];

    let first = Arc::new(ScriptedSource::with_counts(&counts));
    run(&config, first, ExportMode::Full, date(2023, 3, 1)).await;

    let flaky = Arc::new(ScriptedSource::with_counts(&counts).failing(month(2023, 1)));
    let (_, summary) = run(&config, flaky, ExportMode::Full, date(2023, 3, 1)).await;
    assert_eq!(summary.failed_windows.len(), 1);
    assert_eq!(summary.carried_windows, vec![month(2023, 1)]);
    assert_eq!(summary.combined_written, 5);

    let store = AggregationStore::new(dir.path());
    let january = assert_forms_match(&store, &PartitionKey::Month(month(2023, 1)));
    let yearly = assert_forms_match(&store, &PartitionKey::Year(2023));
    let combined = assert_forms_match(&store, &PartitionKey::Combined);
    assert_eq!(january.len(), 2);
    assert_eq!(yearly.len(), 5);
    assert_eq!(combined, yearly);
    for record in &january {
        assert!(yearly.contains(record), "january record missing from yearly");
    }
}

#[tokio::test]
async fn blank_descriptive_fields_read_back_the_same_in_both_forms() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let source = Arc::new(ScriptedSource::with_counts(&[(month(2023, 1), 2)]).with_blank_text());

    let (_, summary) = run(&config, source, ExportMode::Incremental, date(2023, 2, 1)).await;
    assert_eq!(summary.records_valid, 2);

    let store = AggregationStore::new(dir.path());
    let combined = assert_forms_match(&store, &PartitionKey::Combined);
    assert!(combined.iter().all(|r| r.location.is_none() && r.country.is_none()));
}
