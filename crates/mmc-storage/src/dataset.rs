//! Filesystem dataset writer.
//!
//! Writes an N-dimensional image dataset (N >= 3, the last two dimensions
//! being Y and X) into its own directory:
//!
//! ```text
//! <path>/<name>[_k]/
//!     summary.json    shape, pixel type, dimension names, summary metadata
//!     data.raw        frames in row-major order of the non-spatial coordinates
//!     frames.jsonl    one JSON object per written frame (coordinates + metadata)
//! ```
//!
//! The dataset name is made unique by appending `_1`, `_2`, ... when the
//! directory already exists. Only one dataset may be open at a time.

use mmc_core::error::{CoreError, CoreResult};
use mmc_core::image::PixelType;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Raw pixel file name inside a dataset directory.
pub const DATA_FILE: &str = "data.raw";
/// Summary metadata file name inside a dataset directory.
pub const SUMMARY_FILE: &str = "summary.json";
/// Per-frame metadata file name inside a dataset directory.
pub const FRAMES_FILE: &str = "frames.jsonl";

#[derive(Serialize)]
struct Summary<'a> {
    name: &'a str,
    handle: &'a str,
    shape: &'a [u32],
    dimensions: Vec<String>,
    pixel_type: &'a str,
    bytes_per_pixel: u32,
    summary: Value,
}

#[derive(Serialize)]
struct FrameRecord<'a> {
    coordinates: &'a [u32],
    metadata: Value,
}

struct OpenDataset {
    handle: String,
    dir: PathBuf,
    shape: Vec<u32>,
    frame_bytes: usize,
    data: File,
    frames: BufWriter<File>,
    written: u64,
}

impl OpenDataset {
    fn frame_index(&self, coordinates: &[u32]) -> CoreResult<u64> {
        let outer = &self.shape[..self.shape.len() - 2];
        if coordinates.len() != outer.len() {
            return Err(CoreError::Storage(format!(
                "expected {} coordinates, got {}",
                outer.len(),
                coordinates.len()
            )));
        }
        let mut index = 0u64;
        for (axis, (&c, &size)) in coordinates.iter().zip(outer).enumerate() {
            if c >= size {
                return Err(CoreError::Storage(format!(
                    "coordinate {c} out of range for dimension {axis} of size {size}"
                )));
            }
            index = index * u64::from(size) + u64::from(c);
        }
        Ok(index)
    }
}

/// Single-stream dataset writer.
#[derive(Default)]
pub struct DatasetWriter {
    open: Mutex<Option<OpenDataset>>,
}

impl DatasetWriter {
    /// Creates a writer with no open dataset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a dataset under `path` and returns its handle.
    ///
    /// `shape` lists dimension sizes slowest first. `metadata_json` is the
    /// summary metadata and may be empty.
    pub fn create(
        &self,
        path: impl AsRef<Path>,
        name: &str,
        shape: &[u32],
        pixel_type: PixelType,
        metadata_json: &str,
    ) -> CoreResult<String> {
        let mut open = self.open.lock();
        if open.is_some() {
            return Err(CoreError::Storage(
                "another dataset is already open; only one is supported".into(),
            ));
        }
        if shape.len() < 3 {
            return Err(CoreError::Storage(format!(
                "datasets need at least 3 dimensions, got {}",
                shape.len()
            )));
        }
        if shape.iter().any(|&d| d == 0) {
            return Err(CoreError::Storage(format!(
                "dataset shape {shape:?} has an empty dimension"
            )));
        }
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(CoreError::Storage(format!("invalid dataset name \"{name}\"")));
        }
        let summary = parse_metadata(metadata_json)?;

        let (height, width) = (shape[shape.len() - 2], shape[shape.len() - 1]);
        let frame_bytes = (height as usize)
            .checked_mul(width as usize)
            .and_then(|px| px.checked_mul(pixel_type.bytes_per_pixel() as usize))
            .ok_or_else(|| CoreError::Storage("frame size overflows".into()))?;

        let dir = unique_dir(path.as_ref(), name);
        fs::create_dir_all(&dir)?;
        let handle = uuid::Uuid::new_v4().to_string();

        let dataset_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());
        let summary = Summary {
            name: &dataset_name,
            handle: &handle,
            shape,
            dimensions: dimension_names(shape.len()),
            pixel_type: pixel_type.tag(),
            bytes_per_pixel: pixel_type.bytes_per_pixel(),
            summary,
        };
        let summary_json = serde_json::to_string_pretty(&summary)
            .map_err(|e| CoreError::Storage(format!("cannot encode summary: {e}")))?;
        fs::write(dir.join(SUMMARY_FILE), summary_json)?;

        let data = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(dir.join(DATA_FILE))?;
        let frames = BufWriter::new(File::create(dir.join(FRAMES_FILE))?);

        tracing::info!(
            dataset = %dir.display(),
            handle = %handle,
            dims = shape.len(),
            "created dataset"
        );
        *open = Some(OpenDataset {
            handle: handle.clone(),
            dir,
            shape: shape.to_vec(),
            frame_bytes,
            data,
            frames,
            written: 0,
        });
        Ok(handle)
    }

    /// Writes one frame at `coordinates` (one per non-spatial dimension).
    pub fn write_frame(
        &self,
        handle: &str,
        coordinates: &[u32],
        pixels: &[u8],
        metadata_json: &str,
    ) -> CoreResult<()> {
        let mut open = self.open.lock();
        let dataset = checked(&mut open, handle)?;
        if pixels.len() != dataset.frame_bytes {
            return Err(CoreError::Storage(format!(
                "frame of {} bytes does not match dataset frame size {} bytes",
                pixels.len(),
                dataset.frame_bytes
            )));
        }
        let index = dataset.frame_index(coordinates)?;
        let metadata = parse_metadata(metadata_json)?;

        dataset
            .data
            .seek(SeekFrom::Start(index * dataset.frame_bytes as u64))?;
        dataset.data.write_all(pixels)?;

        let record = FrameRecord {
            coordinates,
            metadata,
        };
        serde_json::to_writer(&mut dataset.frames, &record)
            .map_err(|e| CoreError::Storage(format!("cannot encode frame metadata: {e}")))?;
        dataset.frames.write_all(b"\n")?;
        dataset.written += 1;
        Ok(())
    }

    /// True if `handle` is the open dataset.
    pub fn is_open(&self, handle: &str) -> bool {
        self.open
            .lock()
            .as_ref()
            .is_some_and(|d| d.handle == handle)
    }

    /// Directory of the open dataset `handle`.
    pub fn dataset_dir(&self, handle: &str) -> CoreResult<PathBuf> {
        let mut open = self.open.lock();
        Ok(checked(&mut open, handle)?.dir.clone())
    }

    /// Flushes and closes `handle`; returns the number of frames written.
    pub fn close(&self, handle: &str) -> CoreResult<u64> {
        let mut open = self.open.lock();
        checked(&mut open, handle)?;
        let Some(mut dataset) = open.take() else {
            return Err(CoreError::Storage("no dataset is open".into()));
        };
        dataset.frames.flush()?;
        dataset.data.sync_all()?;
        tracing::info!(
            dataset = %dataset.dir.display(),
            frames = dataset.written,
            "closed dataset"
        );
        Ok(dataset.written)
    }
}

impl std::fmt::Debug for DatasetWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let open = self.open.lock();
        f.debug_struct("DatasetWriter")
            .field("open", &open.as_ref().map(|d| d.dir.clone()))
            .finish()
    }
}

fn checked<'a>(open: &'a mut Option<OpenDataset>, handle: &str) -> CoreResult<&'a mut OpenDataset> {
    match open.as_mut() {
        Some(dataset) if dataset.handle == handle => Ok(dataset),
        Some(_) => Err(CoreError::Storage(format!("invalid dataset handle {handle}"))),
        None => Err(CoreError::Storage("no dataset is open".into())),
    }
}

fn parse_metadata(json: &str) -> CoreResult<Value> {
    if json.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(json).map_err(|e| CoreError::Storage(format!("invalid metadata JSON: {e}")))
}

fn unique_dir(root: &Path, name: &str) -> PathBuf {
    let mut candidate = root.join(name);
    let mut counter = 1u32;
    while candidate.exists() {
        candidate = root.join(format!("{name}_{counter}"));
        counter += 1;
    }
    candidate
}

fn dimension_names(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| match count - i {
            2 => "y".to_string(),
            1 => "x".to_string(),
            _ => format!("dim-{i}"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_write_close() {
        let root = tempdir().unwrap();
        let writer = DatasetWriter::new();
        let handle = writer
            .create(root.path(), "run", &[2, 4, 8], PixelType::Gray8, r#"{"User":"me"}"#)
            .unwrap();
        assert!(writer.is_open(&handle));
        let dir = writer.dataset_dir(&handle).unwrap();

        writer.write_frame(&handle, &[1], &[1u8; 32], "").unwrap();
        writer
            .write_frame(&handle, &[0], &[2u8; 32], r#"{"ImageNumber":"0"}"#)
            .unwrap();
        assert_eq!(writer.close(&handle).unwrap(), 2);
        assert!(!writer.is_open(&handle));

        let data = fs::read(dir.join(DATA_FILE)).unwrap();
        assert_eq!(data.len(), 64);
        assert!(data[..32].iter().all(|b| *b == 2));
        assert!(data[32..].iter().all(|b| *b == 1));

        let summary: Value =
            serde_json::from_str(&fs::read_to_string(dir.join(SUMMARY_FILE)).unwrap()).unwrap();
        assert_eq!(summary["pixel_type"], "GRAY8");
        assert_eq!(summary["dimensions"][2], "x");
        assert_eq!(summary["summary"]["User"], "me");

        let frames = fs::read_to_string(dir.join(FRAMES_FILE)).unwrap();
        assert_eq!(frames.lines().count(), 2);
    }

    #[test]
    fn test_names_are_made_unique() {
        let root = tempdir().unwrap();
        let writer = DatasetWriter::new();
        let first = writer
            .create(root.path(), "acq", &[1, 2, 2], PixelType::Gray16, "")
            .unwrap();
        writer.close(&first).unwrap();
        let second = writer
            .create(root.path(), "acq", &[1, 2, 2], PixelType::Gray16, "")
            .unwrap();
        assert_ne!(first, second);
        assert!(writer.dataset_dir(&second).unwrap().ends_with("acq_1"));
    }

    #[test]
    fn test_rejections() {
        let root = tempdir().unwrap();
        let writer = DatasetWriter::new();
        assert!(writer
            .create(root.path(), "flat", &[4, 4], PixelType::Gray8, "")
            .is_err());
        let handle = writer
            .create(root.path(), "ok", &[3, 2, 2], PixelType::Gray16, "")
            .unwrap();
        assert!(writer
            .create(root.path(), "second", &[3, 2, 2], PixelType::Gray16, "")
            .is_err());
        // wrong byte count
        assert!(writer.write_frame(&handle, &[0], &[0u8; 4], "").is_err());
        // coordinate out of range
        assert!(writer.write_frame(&handle, &[3], &[0u8; 8], "").is_err());
        // bad handle
        assert!(writer.write_frame("nope", &[0], &[0u8; 8], "").is_err());
        assert!(writer.close("nope").is_err());
        writer.close(&handle).unwrap();
    }
}
