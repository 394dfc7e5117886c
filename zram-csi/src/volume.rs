//! Volume identity.
//!
//! A volume id packs the storage class `source`, the volume's `subDir` and an
//! optional disambiguating `uuid` into `source#subDir#uuid`. The id is the
//! only state the driver keeps about a volume; everything else is recovered
//! from the live mount table.

use std::collections::HashMap;

use crate::error::{Error, Result};

pub const SOURCE_FIELD: &str = "source";
pub const SUB_DIR_FIELD: &str = "subdir";
pub const MOUNT_OPTIONS_FIELD: &str = "mountoptions";

pub const PVC_NAME_KEY: &str = "csi.storage.k8s.io/pvc/name";
pub const PVC_NAMESPACE_KEY: &str = "csi.storage.k8s.io/pvc/namespace";
pub const PV_NAME_KEY: &str = "csi.storage.k8s.io/pv/name";

pub const PVC_NAME_METADATA: &str = "${pvc.metadata.name}";
pub const PVC_NAMESPACE_METADATA: &str = "${pvc.metadata.namespace}";
pub const PV_NAME_METADATA: &str = "${pv.metadata.name}";

/// Device tuning keys, read again by the node from the volume context.
pub const COMP_ALGORITHM_FIELD: &str = "compalgorithm";
pub const MAX_COMP_STREAMS_FIELD: &str = "maxcompstreams";
pub const MEM_LIMIT_FIELD: &str = "memlimit";

const SEPARATOR: char = '#';

/// Decoded form of a volume id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZramVolume {
    pub source: String,
    pub sub_dir: String,
    pub uuid: String,
    pub size: i64,
}

impl ZramVolume {
    /// Build the identity for a new volume from storage class parameters.
    ///
    /// Keys are matched case-insensitively. `subDir` defaults to `name`; only
    /// an explicit `subDir` records `name` as the uuid.
    pub fn from_parameters(name: &str, size: i64, params: &HashMap<String, String>) -> Result<Self> {
        let mut source = "";
        let mut sub_dir = "";
        let mut replacements = HashMap::new();

        for (key, value) in params {
            match key.to_lowercase().as_str() {
                SOURCE_FIELD => source = value.as_str(),
                SUB_DIR_FIELD => sub_dir = value.as_str(),
                PVC_NAME_KEY => {
                    replacements.insert(PVC_NAME_METADATA, value.as_str());
                }
                PVC_NAMESPACE_KEY => {
                    replacements.insert(PVC_NAMESPACE_METADATA, value.as_str());
                }
                PV_NAME_KEY => {
                    replacements.insert(PV_NAME_METADATA, value.as_str());
                }
                MOUNT_OPTIONS_FIELD
                | COMP_ALGORITHM_FIELD
                | MAX_COMP_STREAMS_FIELD
                | MEM_LIMIT_FIELD => {}
                _ => return Err(Error::InvalidParameter(key.clone())),
            }
        }

        if source.is_empty() {
            return Err(Error::MissingParameter(SOURCE_FIELD));
        }

        let (sub_dir, uuid) = if sub_dir.is_empty() {
            (name.to_string(), String::new())
        } else {
            (replace_with_map(sub_dir, &replacements), name.to_string())
        };

        Ok(Self {
            source: source.to_string(),
            sub_dir,
            uuid,
            size,
        })
    }

    /// Parse a volume id. At least `source#subDir` is required; with three
    /// or more segments the last one is the uuid.
    pub fn from_volume_id(id: &str) -> Result<Self> {
        let segments: Vec<&str> = id.split(SEPARATOR).collect();
        let (source, sub_dir, uuid) = match segments.as_slice() {
            [] | [_] => return Err(Error::InvalidVolumeId(id.to_string())),
            [source, sub_dir] => (*source, sub_dir.to_string(), ""),
            [source, middle @ .., uuid] => (*source, middle.join("#"), *uuid),
        };

        Ok(Self {
            source: format!("//{}", source.trim_start_matches('/')),
            sub_dir,
            uuid: uuid.to_string(),
            size: 0,
        })
    }

    pub fn volume_id(&self) -> String {
        format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.source.trim_start_matches('/'),
            self.sub_dir,
            self.uuid
        )
    }
}

/// Replace every placeholder key in `s` with its value.
fn replace_with_map(s: &str, replacements: &HashMap<&str, &str>) -> String {
    replacements
        .iter()
        .filter(|(k, _)| !k.is_empty())
        .fold(s.to_string(), |acc, (k, v)| acc.replace(*k, v))
}

/// Case-insensitive lookup.
pub fn get_ci<'a>(map: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    map.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

/// Insert `key`, overwriting an existing entry that differs only in case.
pub fn set_key_value_in_map(map: &mut HashMap<String, String>, key: &str, value: String) {
    if let Some(existing) = map.keys().find(|k| k.eq_ignore_ascii_case(key)).cloned() {
        map.insert(existing, value);
    } else {
        map.insert(key.to_string(), value);
    }
}
