//! Dataset directory layout and post-run verification.
//!
//! A dataset root holds `images/`, `keypoints/` and `descriptors/`. For an image named
//! `NAME` the artifacts are `keypoints/NAME.bin` and `descriptors/NAME.bin`.

use std::io;
use std::path::PathBuf;

use image::ImageFormat;
use rayon::prelude::*;
use rootsift_core::{DESCRIPTOR_DIM, ImageTask, KeypointStore, TaskError, TaskResult};

use crate::keypoints::{MatrixKeypointStore, matrix_task_error};
use crate::matrix::read_matrix;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DatasetLayout {
    pub root: PathBuf,
    pub images_dir: PathBuf,
    pub keypoints_dir: PathBuf,
    pub descriptors_dir: PathBuf,
    /// Artifact extension appended to the image file name
    pub extension: String,
}

impl Default for DatasetLayout {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            images_dir: PathBuf::from("images"),
            keypoints_dir: PathBuf::from("keypoints"),
            descriptors_dir: PathBuf::from("descriptors"),
            extension: "bin".to_string(),
        }
    }
}

impl DatasetLayout {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into(), ..Self::default() }
    }

    pub fn images_path(&self) -> PathBuf {
        self.root.join(&self.images_dir)
    }

    pub fn keypoint_path(&self, image_name: &str) -> PathBuf {
        self.root.join(&self.keypoints_dir).join(self.artifact_name(image_name))
    }

    pub fn descriptor_path(&self, image_name: &str) -> PathBuf {
        self.root.join(&self.descriptors_dir).join(self.artifact_name(image_name))
    }

    fn artifact_name(&self, image_name: &str) -> String {
        format!("{}.{}", image_name, self.extension)
    }

    pub fn task(&self, image_name: &str) -> ImageTask {
        ImageTask::new(
            image_name,
            self.images_path().join(image_name),
            self.keypoint_path(image_name),
            self.descriptor_path(image_name),
        )
    }

    /// One task per decodable image file in the images directory, sorted by name
    pub fn discover_tasks(&self) -> io::Result<Vec<ImageTask>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(self.images_path())? {
            let path = entry?.path();
            if !path.is_file() || ImageFormat::from_path(&path).is_err() {
                continue;
            }
            match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => names.push(name.to_string()),
                None => tracing::warn!("skipping image with non UTF-8 name: {}", path.display()),
            }
        }
        names.sort();
        Ok(names.iter().map(|name| self.task(name)).collect())
    }
}

/// A task whose artifacts fail verification
#[derive(Debug)]
pub struct VerifyIssue {
    pub image: String,
    pub error: TaskError,
}

/// Check one image's artifacts; returns the number of verified descriptors.
///
/// Keypoints must parse; descriptors must have `DESCRIPTOR_DIM` finite columns and one
/// row per keypoint.
pub fn verify_task(task: &ImageTask) -> TaskResult<usize> {
    let keypoints = MatrixKeypointStore.load(&task.keypoint_path)?;
    let path = task.descriptor_path.as_path();
    let descriptors = read_matrix(path).map_err(|e| matrix_task_error(path, e))?;

    if descriptors.rows() > 0 && descriptors.cols() != DESCRIPTOR_DIM {
        return Err(TaskError::malformed(
            path,
            format!("descriptor matrix has {} columns, expected {}", descriptors.cols(), DESCRIPTOR_DIM),
        ));
    }
    if let Some(i) = descriptors.as_slice().iter().position(|v| !v.is_finite()) {
        return Err(TaskError::malformed(
            path,
            format!("non-finite value in descriptor {}", i / descriptors.cols()),
        ));
    }
    if descriptors.rows() != keypoints.len() {
        return Err(TaskError::CountMismatch {
            keypoints: keypoints.len(),
            descriptors: descriptors.rows(),
        });
    }
    Ok(descriptors.rows())
}

pub fn verify_dataset(tasks: &[ImageTask]) -> Vec<VerifyIssue> {
    tasks
        .par_iter()
        .filter_map(|task| {
            verify_task(task).err().map(|error| VerifyIssue { image: task.name.clone(), error })
        })
        .collect()
}
