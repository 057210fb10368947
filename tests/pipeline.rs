//! End-to-end run: collect, resolve calibration, plan, execute

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image_space::batch::{self, BatchDispatcher, BatchEvent, ImageCorrector, ImageJob, NamingMode, RunSettings};
use image_space::calibration::{CalibrationEntry, SwatchDetector, SwatchSet, SWATCH_COUNT};
use image_space::config::Settings;
use image_space::state::data::ImageStatus;
use image_space::state::edit::Adjustments;
use image_space::state::library::Library;
use image_space::state::Session;
use image_space::{Error, Result};
use tempfile::TempDir;

/// Returns a grey swatch set whose first value encodes the chart name length
struct FakeDetector {
    calls: Mutex<Vec<PathBuf>>,
}

impl SwatchDetector for FakeDetector {
    fn detect(&self, chart: &Path) -> Result<Vec<[f32; 3]>> {
        self.calls.lock().unwrap().push(chart.to_path_buf());
        let mut rows = vec![[0.5f32; 3]; SWATCH_COUNT];
        rows[0][0] = chart.file_name().unwrap().len() as f32 / 100.0;
        Ok(rows)
    }
}

/// Writes the calibration source into the output file instead of pixels
#[derive(Default)]
struct FakeCorrector {
    seen: Mutex<Vec<(PathBuf, bool)>>,
}

impl ImageCorrector for FakeCorrector {
    fn correct(
        &self,
        job: &ImageJob,
        calibration: Option<&CalibrationEntry>,
        _settings: &RunSettings,
    ) -> Result<()> {
        let fallback = calibration.map(|c| c.is_fallback).unwrap_or(false);
        self.seen.lock().unwrap().push((job.input.clone(), fallback));
        if let Some(parent) = job.output.parent() {
            fs::create_dir_all(parent)?;
        }
        let source = calibration
            .and_then(|c| c.source_file.as_deref())
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        fs::write(&job.output, source)?;
        Ok(())
    }
}

fn shoot(names: &[&str]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for name in names {
        let path = dir.path().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }
    dir
}

fn prefix_settings() -> Settings {
    Settings {
        use_import_rules: true,
        group_by_prefix: true,
        prefix_string: "_".to_string(),
        ..Default::default()
    }
}

fn open(dir: &Path, settings: &Settings) -> Session {
    let mut session = Session::new(settings.grouping_rules());
    session
        .collect(dir, &Library::new(settings.collect_options()))
        .unwrap();
    session
}

fn run_settings(input: &Path, output: &Path, naming: NamingMode, workers: usize) -> RunSettings {
    RunSettings {
        input_root: input.to_path_buf(),
        output_dir: output.to_path_buf(),
        naming,
        custom_name: String::new(),
        output: Settings::default().output_settings(),
        adjustments: Adjustments::default(),
        workers,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_run_with_chart_and_fallback() {
    let input = shoot(&[
        "A_chart.nef",
        "A_001.nef",
        "A_002.nef",
        "A_003.nef",
        "B_001.nef",
        "B_002.nef",
        "notes.txt",
    ]);
    let output = TempDir::new().unwrap();
    let settings = prefix_settings();
    let mut session = open(input.path(), &settings);
    assert_eq!(session.images.len(), 6);

    let chart = input.path().join("A_chart.nef");
    assert_eq!(session.set_chart(&chart).unwrap(), "A");
    session
        .calibration
        .set_fallback(Some(PathBuf::from("default.json")), SwatchSet::new([[0.4; 3]; SWATCH_COUNT]));

    let detector = FakeDetector {
        calls: Mutex::new(Vec::new()),
    };
    let calibrations = session
        .calibration
        .resolve_all(&session.groups, &detector)
        .into_result()
        .unwrap();
    assert_eq!(detector.calls.lock().unwrap().as_slice(), &[chart.clone()]);
    assert!(!calibrations["A"].as_ref().unwrap().is_fallback);
    assert!(calibrations["B"].as_ref().unwrap().is_fallback);

    let plan = batch::plan(
        &session.planned_images(),
        &calibrations,
        run_settings(
            input.path(),
            output.path(),
            NamingMode::Schema {
                schema: "[s]/[o]_[n2][e]".to_string(),
            },
            2,
        ),
    )
    .unwrap();
    assert_eq!(plan.image_count(), 6);

    let corrector = Arc::new(FakeCorrector::default());
    session.begin_run(plan.image_count());
    let handle = BatchDispatcher::new(2).execute(plan, corrector.clone()).unwrap();
    let progress = handle.wait(|event, _| session.apply_event(event)).await;

    assert_eq!(progress.finished, 6);
    assert!(session.progress().unwrap().is_complete());
    assert!(session
        .images
        .iter()
        .all(|r| r.status == ImageStatus::Finished));

    // Numbering restarts in each group folder, in collection order
    let a2 = session.images.by_path(&input.path().join("A_002.nef")).unwrap();
    assert_eq!(a2.output_path.as_deref(), Some(output.path().join("A/A_002_02.jpg").as_path()));
    assert_eq!(a2.calibration_ref.as_deref(), Some(chart.as_path()));
    let b1 = output.path().join("B/B_001_01.jpg");
    assert_eq!(fs::read_to_string(b1).unwrap(), "default.json");

    let fallbacks: HashMap<PathBuf, bool> = corrector.seen.lock().unwrap().iter().cloned().collect();
    assert!(fallbacks[&input.path().join("B_002.nef")]);
    assert!(!fallbacks[&input.path().join("A_001.nef")]);
}

#[tokio::test]
async fn test_missing_calibration_blocks_planning() {
    let input = shoot(&["A_001.nef", "B_001.nef"]);
    let session = open(input.path(), &prefix_settings());
    session
        .calibration
        .set_group_swatches("A", None, &[[0.5; 3]; SWATCH_COUNT])
        .unwrap();

    let detector = FakeDetector {
        calls: Mutex::new(Vec::new()),
    };
    let result = session
        .calibration
        .resolve_all(&session.groups, &detector)
        .into_result();

    match result {
        Err(Error::MissingCalibration(groups)) => assert_eq!(groups, vec!["B".to_string()]),
        other => panic!("unexpected {other:?}"),
    }
    assert!(detector.calls.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_without_charts_uses_sequential_names() {
    let input = shoot(&["day1/x_1.nef", "day1/x_2.nef", "day2/y_1.nef"]);
    let output = TempDir::new().unwrap();
    let settings = Settings {
        use_import_rules: true,
        look_in_subfolders: true,
        group_by_subfolder: true,
        dont_use_chart: true,
        ..Default::default()
    };
    let mut session = open(input.path(), &settings);
    session.calibration.set_disabled(settings.dont_use_chart);

    let calibrations = session
        .calibration
        .resolve_all(&session.groups, &FakeDetector {
            calls: Mutex::new(Vec::new()),
        })
        .into_result()
        .unwrap();
    assert!(calibrations.values().all(Option::is_none));

    let plan = batch::plan(
        &session.planned_images(),
        &calibrations,
        run_settings(input.path(), output.path(), settings.naming_mode(), 4),
    )
    .unwrap();
    let outputs: Vec<PathBuf> = plan.jobs().map(|(_, job)| job.output.clone()).collect();

    let corrector = Arc::new(FakeCorrector::default());
    let progress = BatchDispatcher::new(4)
        .execute(plan, corrector)
        .unwrap()
        .wait(|event, _| assert!(!matches!(event, BatchEvent::Failed { .. })))
        .await;

    assert_eq!(progress.finished, 3);
    assert!(outputs.contains(&output.path().join("day1/x_2_0002.jpg")));
    assert!(outputs.contains(&output.path().join("day2/y_1_0001.jpg")));
    for path in outputs {
        assert!(path.exists(), "{} was not written", path.display());
    }
}

#[test]
fn test_shared_folder_numbers_group_by_group() {
    let input = shoot(&["a.nef", "m/x.nef", "z.nef"]);
    let output = TempDir::new().unwrap();
    let settings = Settings {
        use_import_rules: true,
        look_in_subfolders: true,
        group_by_subfolder: true,
        dont_use_chart: true,
        ..Default::default()
    };
    let session = open(input.path(), &settings);

    let plan = batch::plan(
        &session.planned_images(),
        &HashMap::new(),
        run_settings(
            input.path(),
            output.path(),
            NamingMode::Schema {
                schema: "[r]/[o]_[n]".to_string(),
            },
            2,
        ),
    )
    .unwrap();

    let root = input.path().file_name().unwrap().to_string_lossy().to_string();
    let folder = output.path().join(root);
    let sequence = |name: &str| plan.rename_map.sequence(&input.path().join(name));
    assert_eq!(sequence("a.nef"), Some(1));
    assert_eq!(sequence("z.nef"), Some(2));
    assert_eq!(sequence("m/x.nef"), Some(3));

    let outputs: Vec<PathBuf> = plan.jobs().map(|(_, job)| job.output.clone()).collect();
    assert!(outputs.contains(&folder.join("z_2.jpg")));
    assert!(outputs.contains(&folder.join("x_3.jpg")));
}
