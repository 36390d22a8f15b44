//! Outgoing messages on disk, as a JSON list.

use cli_log::*;
use nerdcan::OutgoingMessageSpec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct StoredMessage {
    uuid: String,
    id: u32,
    dlc: u8,
    cycle_time_ms: u64,
    data: Vec<u8>,
}

impl From<&OutgoingMessageSpec> for StoredMessage {
    fn from(spec: &OutgoingMessageSpec) -> Self {
        Self {
            uuid: spec.id.to_string(),
            id: spec.identifier,
            dlc: spec.dlc() as u8,
            cycle_time_ms: spec.period.as_millis() as u64,
            data: spec.payload.clone(),
        }
    }
}

/// A missing file is an empty list; entries with a malformed uuid are
/// skipped.
pub fn load(path: &Path) -> io::Result<Vec<OutgoingMessageSpec>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e),
    };
    let stored: Vec<StoredMessage> =
        serde_json::from_str(&text).map_err(io::Error::other)?;

    Ok(stored
        .into_iter()
        .filter_map(|message| {
            let id = match Uuid::parse_str(&message.uuid) {
                Ok(id) => id,
                Err(e) => {
                    warn!("skipping message {}: {}", message.uuid, e);
                    return None;
                }
            };
            let mut payload = message.data;
            payload.resize(message.dlc as usize, 0);
            Some(OutgoingMessageSpec {
                id,
                identifier: message.id,
                payload,
                period: Duration::from_millis(message.cycle_time_ms),
                active: false,
                trigger: None,
            })
        })
        .collect())
}

pub fn save(path: &Path, specs: &[OutgoingMessageSpec]) -> io::Result<()> {
    let stored: Vec<StoredMessage> = specs.iter().map(Into::into).collect();
    let text = serde_json::to_string_pretty(&stored).map_err(io::Error::other)?;
    fs::write(path, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let specs = load(&dir.path().join("messages.json")).unwrap();
        assert!(specs.is_empty());
    }

    #[test]
    fn saved_messages_load_idle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.json");
        let mut cyclic = OutgoingMessageSpec::new(
            0x18FF_0001,
            &[1, 2, 3],
            Duration::from_millis(100),
        );
        cyclic.active = true;
        let one_shot = OutgoingMessageSpec::new(0x7DF, &[], Duration::ZERO);
        save(&path, &[cyclic.clone(), one_shot.clone()]).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, cyclic.id);
        assert_eq!(loaded[0].identifier, 0x18FF_0001);
        assert_eq!(loaded[0].payload, vec![1, 2, 3]);
        assert_eq!(loaded[0].period, Duration::from_millis(100));
        assert!(!loaded[0].active);
        assert_eq!(loaded[1], one_shot);
    }

    #[test]
    fn payload_follows_dlc_and_bad_uuids_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.json");
        let uuid = Uuid::new_v4();
        let text = format!(
            r#"[
  {{"uuid": "not-a-uuid", "id": 1, "dlc": 0, "cycle_time_ms": 0, "data": []}},
  {{"uuid": "{}", "id": 291, "dlc": 4, "cycle_time_ms": 50, "data": [170]}}
]"#,
            uuid
        );
        fs::write(&path, text).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, uuid);
        assert_eq!(loaded[0].identifier, 0x123);
        assert_eq!(loaded[0].payload, vec![0xAA, 0, 0, 0]);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.json");
        fs::write(&path, "{").unwrap();
        assert!(load(&path).is_err());
    }
}
