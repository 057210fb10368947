/// Batch planning: numbering and chunking
///
/// A plan is computed once, before any worker starts, and is read-only
/// afterwards. Sequence numbers are contiguous from 1 within each numbering
/// scope, assigned in the order the images are given (group by group when
/// they come from a session):
/// - schema naming: images sharing a resolved output directory
/// - sequential naming: images sharing a group

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::calibration::CalibrationEntry;
use crate::error::{Error, Result};
use crate::naming::{PathBuilder, PlaceholderContext, SchemaEngine};
use crate::state::edit::{Adjustments, OutputSettings};

/// How output files are named
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamingMode {
    Schema { schema: String },
    /// `<custom or stem>_<n>` with `n` zero-padded to `padding` digits
    Sequential { padding: usize },
}

/// Parameters shared by every task of a run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    /// Selected input folder; its name is `[r]`
    pub input_root: PathBuf,
    pub output_dir: PathBuf,
    pub naming: NamingMode,
    pub custom_name: String,
    pub output: OutputSettings,
    pub adjustments: Adjustments,
    pub workers: usize,
}

impl RunSettings {
    fn root_name(&self) -> String {
        self.input_root.to_string_lossy().to_string()
    }

    /// Placeholder context for one image
    pub fn context(&self, input: &Path, group: &str, number: u32) -> PlaceholderContext {
        PlaceholderContext::for_image(
            input,
            &self.root_name(),
            group,
            &self.custom_name,
            number,
            self.output.format.extension(),
        )
    }
}

/// An image to be planned, in collection order
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedImage {
    pub path: PathBuf,
    pub group: String,
    pub exposure_multiplier: Option<f32>,
}

/// Input path -> 1-based sequence number
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenameMap(HashMap<PathBuf, u32>);

impl RenameMap {
    pub fn sequence(&self, input: &Path) -> Option<u32> {
        self.0.get(input).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &u32)> {
        self.0.iter()
    }
}

/// One image of a chunk
#[derive(Debug, Clone, PartialEq)]
pub struct ImageJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub sequence: u32,
    pub exposure_multiplier: Option<f32>,
}

/// A contiguous slice of one group, processed by one task
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Position in the plan
    pub index: usize,
    pub group: String,
    pub jobs: Vec<ImageJob>,
    /// None when calibration is disabled for the run
    pub calibration: Option<Arc<CalibrationEntry>>,
}

/// Everything a run needs, frozen before dispatch
#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub rename_map: RenameMap,
    pub chunks: Vec<Chunk>,
    pub settings: Arc<RunSettings>,
}

impl BatchPlan {
    pub fn image_count(&self) -> usize {
        self.chunks.iter().map(|c| c.jobs.len()).sum()
    }

    /// Jobs in plan order
    pub fn jobs(&self) -> impl Iterator<Item = (&Chunk, &ImageJob)> {
        self.chunks
            .iter()
            .flat_map(|chunk| chunk.jobs.iter().map(move |job| (chunk, job)))
    }
}

/// Build the numbering map and the chunk list for a run.
///
/// Fails before doing anything when schema naming is on and the schema is
/// invalid. `calibrations` maps group name to the resolved entry; groups
/// absent from it run without calibration.
pub fn plan(
    images: &[PlannedImage],
    calibrations: &HashMap<String, Option<Arc<CalibrationEntry>>>,
    settings: RunSettings,
) -> Result<BatchPlan> {
    if let NamingMode::Schema { schema } = &settings.naming {
        let issues = SchemaEngine::new().validate(schema);
        if !issues.is_empty() {
            return Err(Error::InvalidSchema(issues));
        }
    }

    let builder = PathBuilder::new();
    let mut rename_map = HashMap::new();
    let mut outputs = Vec::with_capacity(images.len());
    let mut counters: HashMap<PathBuf, u32> = HashMap::new();

    for image in images {
        let (sequence, output) = match &settings.naming {
            NamingMode::Schema { schema } => {
                // Provisional number only discovers the directory
                let first = settings.context(&image.path, &image.group, 1);
                let provisional = builder.build(schema, &first, &settings.output_dir);
                let directory = provisional
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| settings.output_dir.clone());

                let counter = counters.entry(directory).or_insert(0);
                *counter += 1;
                let ctx = first.with_number(*counter);
                (*counter, builder.build(schema, &ctx, &settings.output_dir))
            }
            NamingMode::Sequential { padding } => {
                let counter = counters.entry(PathBuf::from(&image.group)).or_insert(0);
                *counter += 1;
                let ctx = settings.context(&image.path, &image.group, *counter);
                (
                    *counter,
                    builder.build_sequential(&ctx, &settings.output_dir, *padding),
                )
            }
        };

        debug!("{} -> #{} {}", image.path.display(), sequence, output.display());
        rename_map.insert(image.path.clone(), sequence);
        outputs.push(ImageJob {
            input: image.path.clone(),
            output,
            sequence,
            exposure_multiplier: image.exposure_multiplier,
        });
    }

    // Group jobs in order of first appearance, keeping collection order
    let mut group_order: Vec<&str> = Vec::new();
    let mut by_group: HashMap<&str, Vec<ImageJob>> = HashMap::new();
    for (image, job) in images.iter().zip(outputs) {
        let jobs = by_group.entry(image.group.as_str()).or_insert_with(|| {
            group_order.push(image.group.as_str());
            Vec::new()
        });
        jobs.push(job);
    }

    let workers = settings.workers.max(1);
    let mut chunks = Vec::new();
    for group in group_order {
        let jobs = by_group.remove(group).unwrap_or_default();
        let calibration = calibrations.get(group).cloned().flatten();
        for slice in split_even(jobs, workers) {
            chunks.push(Chunk {
                index: chunks.len(),
                group: group.to_string(),
                jobs: slice,
                calibration: calibration.clone(),
            });
        }
    }

    info!(
        "Planned {} images in {} chunks across {} workers",
        images.len(),
        chunks.len(),
        workers
    );

    Ok(BatchPlan {
        rename_map: RenameMap(rename_map),
        chunks,
        settings: Arc::new(settings),
    })
}

/// Split into `min(len, parts)` contiguous runs whose sizes differ by at most one
fn split_even<T>(items: Vec<T>, parts: usize) -> Vec<Vec<T>> {
    let len = items.len();
    if len == 0 {
        return Vec::new();
    }
    let count = len.min(parts.max(1));
    let base = len / count;
    let extra = len % count;

    let mut out = Vec::with_capacity(count);
    let mut iter = items.into_iter();
    for i in 0..count {
        let size = base + usize::from(i < extra);
        out.push(iter.by_ref().take(size).collect());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::SwatchSet;
    use crate::naming::SchemaIssue;
    use std::collections::BTreeMap;

    fn settings(naming: NamingMode, workers: usize) -> RunSettings {
        RunSettings {
            input_root: PathBuf::from("/shoot/Project_2024"),
            output_dir: PathBuf::from("/out"),
            naming,
            custom_name: String::new(),
            output: OutputSettings::default(),
            adjustments: Adjustments::default(),
            workers,
        }
    }

    fn image(path: &str, group: &str) -> PlannedImage {
        PlannedImage {
            path: PathBuf::from(path),
            group: group.to_string(),
            exposure_multiplier: None,
        }
    }

    #[test]
    fn test_split_even_sizes() {
        let sizes = |n: usize, k: usize| -> Vec<usize> {
            split_even((0..n).collect::<Vec<_>>(), k)
                .iter()
                .map(Vec::len)
                .collect()
        };
        assert_eq!(sizes(10, 4), vec![3, 3, 2, 2]);
        assert_eq!(sizes(3, 8), vec![1, 1, 1]);
        assert_eq!(sizes(8, 4), vec![2, 2, 2, 2]);
        assert!(sizes(0, 4).is_empty());

        let flat: Vec<usize> = split_even((0..7).collect(), 3).concat();
        assert_eq!(flat, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn test_invalid_schema_fails_fast() {
        let result = plan(
            &[image("/in/a.nef", "G")],
            &HashMap::new(),
            settings(NamingMode::Schema { schema: "[r".into() }, 2),
        );
        match result {
            Err(Error::InvalidSchema(issues)) => {
                assert!(issues.contains(&SchemaIssue::UnmatchedBrackets))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_numbering_is_per_output_directory() {
        // Two groups writing into the same folder share one sequence
        let images = vec![
            image("/in/a1.nef", "A"),
            image("/in/b1.nef", "B"),
            image("/in/a2.nef", "A"),
            image("/in/b2.nef", "B"),
        ];
        let plan = plan(
            &images,
            &HashMap::new(),
            settings(NamingMode::Schema { schema: "[r]/[o]_[n2]".into() }, 2),
        )
        .unwrap();

        let seq: Vec<u32> = images
            .iter()
            .map(|i| plan.rename_map.sequence(&i.path).unwrap())
            .collect();
        assert_eq!(seq, vec![1, 2, 3, 4]);

        let job = plan.jobs().find(|(_, j)| j.input == Path::new("/in/b2.nef")).unwrap().1;
        assert_eq!(job.output, PathBuf::from("/out/Project_2024/b2_04.jpg"));
    }

    #[test]
    fn test_numbering_restarts_per_directory() {
        let images = vec![
            image("/in/a1.nef", "A"),
            image("/in/b1.nef", "B"),
            image("/in/a2.nef", "A"),
        ];
        let plan = plan(
            &images,
            &HashMap::new(),
            settings(NamingMode::Schema { schema: "[s]/[n3]".into() }, 1),
        )
        .unwrap();

        let mut per_dir: BTreeMap<PathBuf, Vec<u32>> = BTreeMap::new();
        for (_, job) in plan.jobs() {
            per_dir
                .entry(job.output.parent().unwrap().to_path_buf())
                .or_default()
                .push(job.sequence);
        }
        assert_eq!(per_dir[Path::new("/out/A")], vec![1, 2]);
        assert_eq!(per_dir[Path::new("/out/B")], vec![1]);
    }

    #[test]
    fn test_sequential_numbering_is_per_group() {
        let images = vec![
            image("/in/a1.nef", "A"),
            image("/in/b1.nef", "B"),
            image("/in/a2.nef", "A"),
        ];
        let plan = plan(
            &images,
            &HashMap::new(),
            settings(NamingMode::Sequential { padding: 4 }, 4),
        )
        .unwrap();

        assert_eq!(plan.rename_map.sequence(Path::new("/in/a2.nef")), Some(2));
        assert_eq!(plan.rename_map.sequence(Path::new("/in/b1.nef")), Some(1));
        let job = plan.jobs().find(|(_, j)| j.input == Path::new("/in/a2.nef")).unwrap().1;
        assert_eq!(job.output, PathBuf::from("/out/A/a2_0002.jpg"));
    }

    #[test]
    fn test_chunks_carry_group_calibration() {
        let images: Vec<PlannedImage> = (0..5)
            .map(|i| image(&format!("/in/a{i}.nef"), "A"))
            .chain((0..2).map(|i| image(&format!("/in/b{i}.nef"), "B")))
            .collect();
        let entry = Arc::new(CalibrationEntry {
            source_file: None,
            swatches: SwatchSet::new([[0.5; 3]; 24]),
            is_fallback: true,
        });
        let mut calibrations = HashMap::new();
        calibrations.insert("A".to_string(), Some(Arc::clone(&entry)));
        calibrations.insert("B".to_string(), None);

        let plan = plan(&images, &calibrations, settings(NamingMode::Sequential { padding: 2 }, 3))
            .unwrap();

        let shape: Vec<(&str, usize)> = plan
            .chunks
            .iter()
            .map(|c| (c.group.as_str(), c.jobs.len()))
            .collect();
        assert_eq!(shape, vec![("A", 2), ("A", 2), ("A", 1), ("B", 1), ("B", 1)]);
        assert!(plan.chunks[..3].iter().all(|c| c.calibration.as_ref() == Some(&entry)));
        assert!(plan.chunks[3..].iter().all(|c| c.calibration.is_none()));
        assert_eq!(plan.chunks.iter().map(|c| c.index).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert_eq!(plan.image_count(), 7);

        // Order inside the group is preserved across chunks
        let order: Vec<&Path> = plan.jobs().map(|(_, j)| j.input.as_path()).collect();
        let expected: Vec<&Path> = images.iter().map(|i| i.path.as_path()).collect();
        assert_eq!(order, expected);
    }
}
