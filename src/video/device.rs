//! V4L2 device enumeration
//!
//! Scans `/dev/video*` nodes and pairs each with its card name from
//! `/sys/class/video4linux`. Capture itself is delegated to the external
//! tool, so no device is ever opened here.

use serde::Serialize;
use std::path::Path;
use tracing::debug;

use crate::error::Result;

/// One enumerated video device
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VideoDeviceInfo {
    /// Device node path, e.g. /dev/video0
    pub path: String,
    /// V4L2 index parsed from the node name
    pub index: u32,
    /// Card name reported by the driver, if readable
    pub name: Option<String>,
}

/// List video devices on this host, ordered by index
pub async fn enumerate_devices() -> Result<Vec<VideoDeviceInfo>> {
    enumerate_in(Path::new("/dev"), Path::new("/sys/class/video4linux")).await
}

async fn enumerate_in(dev_dir: &Path, sys_dir: &Path) -> Result<Vec<VideoDeviceInfo>> {
    let mut devices = Vec::new();

    let mut entries = match tokio::fs::read_dir(dev_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(devices),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name();
        let Some(node) = file_name.to_str() else {
            continue;
        };
        let Some(index) = video_index(node) else {
            continue;
        };

        let name = tokio::fs::read_to_string(sys_dir.join(node).join("name"))
            .await
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        devices.push(VideoDeviceInfo {
            path: entry.path().to_string_lossy().into_owned(),
            index,
            name,
        });
    }

    devices.sort_by_key(|d| d.index);
    debug!(count = devices.len(), "Enumerated video devices");
    Ok(devices)
}

/// Parse the numeric index from a `videoN` node name
fn video_index(node: &str) -> Option<u32> {
    node.strip_prefix("video")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_video_node_names() {
        assert_eq!(video_index("video0"), Some(0));
        assert_eq!(video_index("video12"), Some(12));
        assert_eq!(video_index("video"), None);
        assert_eq!(video_index("vbi0"), None);
        assert_eq!(video_index("videoX"), None);
    }

    #[tokio::test]
    async fn enumerates_and_orders_devices() {
        let dev = tempdir().unwrap();
        let sys = tempdir().unwrap();

        for node in ["video2", "video0", "vbi0", "null"] {
            std::fs::write(dev.path().join(node), b"").unwrap();
        }
        std::fs::create_dir_all(sys.path().join("video0")).unwrap();
        std::fs::write(sys.path().join("video0/name"), "USB Camera: USB Camera\n").unwrap();
        // video2 has no sysfs entry at all

        let devices = enumerate_in(dev.path(), sys.path()).await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].index, 0);
        assert_eq!(devices[0].name.as_deref(), Some("USB Camera: USB Camera"));
        assert_eq!(devices[1].index, 2);
        assert_eq!(devices[1].name, None);
    }

    #[tokio::test]
    async fn missing_dev_dir_yields_empty_list() {
        let dev = tempdir().unwrap();
        let missing = dev.path().join("nope");
        let devices = enumerate_in(&missing, dev.path()).await.unwrap();
        assert!(devices.is_empty());
    }
}
