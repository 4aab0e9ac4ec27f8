/*!
Checks whether a labelled device is still attached
*/

use std::path::PathBuf;

/// Answers "is the device with this label still attached"
pub trait ConnectivityProbe: Send + Sync {
    fn is_connected(&self, label: &str) -> bool;
}

/// Looks for the `<dir>/<label>` symlink udev maintains under `/dev/disk/by-label`
pub struct ByLabelProbe {
    dir: PathBuf,
}

impl ByLabelProbe {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl ConnectivityProbe for ByLabelProbe {
    fn is_connected(&self, label: &str) -> bool {
        // symlink_metadata so a dangling link still counts as present
        std::fs::symlink_metadata(self.dir.join(label))
            .map(|meta| meta.file_type().is_symlink())
            .unwrap_or(false)
    }
}
