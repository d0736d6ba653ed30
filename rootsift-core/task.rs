use std::path::PathBuf;

/// One unit of batch work: an image and the artifacts it reads and writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTask {
    pub name: String,
    pub image_path: PathBuf,
    pub keypoint_path: PathBuf,
    pub descriptor_path: PathBuf,
}

impl ImageTask {
    pub fn new(
        name: impl Into<String>,
        image_path: impl Into<PathBuf>,
        keypoint_path: impl Into<PathBuf>,
        descriptor_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            image_path: image_path.into(),
            keypoint_path: keypoint_path.into(),
            descriptor_path: descriptor_path.into(),
        }
    }

    /// Both the keypoint and the descriptor artifact already exist
    pub fn is_done(&self) -> bool {
        self.keypoint_path.is_file() && self.descriptor_path.is_file()
    }
}
