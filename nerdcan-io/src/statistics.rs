//! Interface counters from the kernel's per-device statistics directory.

use nerdcan::InterfaceStatistics;
use std::fs;
use std::io;
use std::path::Path;

pub const SYSFS_NET: &str = "/sys/class/net";

/// Read the counters of interface `name` below `root` (normally
/// [`SYSFS_NET`]).
pub fn read(root: &Path, name: &str) -> io::Result<InterfaceStatistics> {
    let dir = root.join(name).join("statistics");
    let counter = |file: &str| -> io::Result<u64> {
        let text = fs::read_to_string(dir.join(file))?;
        text.trim().parse::<u64>().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}/{}: {}", name, file, e),
            )
        })
    };

    Ok(InterfaceStatistics {
        rx_errors: counter("rx_errors")?,
        tx_errors: counter("tx_errors")?,
        rx_bytes: counter("rx_bytes")?,
        tx_bytes: counter("tx_bytes")?,
        rx_frames: counter("rx_packets")?,
        tx_frames: counter("tx_packets")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_counters(root: &Path, name: &str, values: &[(&str, &str)]) {
        let dir = root.join(name).join("statistics");
        fs::create_dir_all(&dir).unwrap();
        for (file, value) in values {
            fs::write(dir.join(file), value).unwrap();
        }
    }

    #[test]
    fn reads_counters() {
        let root = tempfile::tempdir().unwrap();
        write_counters(
            root.path(),
            "can0",
            &[
                ("rx_errors", "3\n"),
                ("tx_errors", "1\n"),
                ("rx_bytes", "8000\n"),
                ("tx_bytes", "16\n"),
                ("rx_packets", "1000\n"),
                ("tx_packets", "2\n"),
            ],
        );

        let stats = read(root.path(), "can0").unwrap();
        assert_eq!(stats.rx_errors, 3);
        assert_eq!(stats.tx_errors, 1);
        assert_eq!(stats.rx_bytes, 8000);
        assert_eq!(stats.tx_bytes, 16);
        assert_eq!(stats.rx_frames, 1000);
        assert_eq!(stats.tx_frames, 2);
    }

    #[test]
    fn missing_interface() {
        let root = tempfile::tempdir().unwrap();
        let err = read(root.path(), "can9").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn garbage_counter() {
        let root = tempfile::tempdir().unwrap();
        write_counters(root.path(), "can0", &[("rx_errors", "lots")]);
        let err = read(root.path(), "can0").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
