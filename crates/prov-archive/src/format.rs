//! Archive format
//!
//! An archive is a manifest, a flat entity table keyed by uuid, a link
//! list and a repository of per-node payload blobs. On disk it is a folder:
//!
//! ```text
//! <archive>/
//!   metadata.json    manifest
//!   data.json        entity table + link list
//!   repo/<uuid>      payload blobs
//! ```

use crate::error::ArchiveError;
use crate::hash::ContentHash;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use prov_graph::{EntityKind, EntityRecord, LinkType, NodeRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Format version written by this crate
pub const ARCHIVE_FORMAT_VERSION: &str = "1.0";

/// Format versions this crate can read
pub const SUPPORTED_VERSIONS: &[&str] = &[ARCHIVE_FORMAT_VERSION];

/// Manifest file name
pub const METADATA_FILE: &str = "metadata.json";

/// Entity table and link list file name
pub const DATA_FILE: &str = "data.json";

/// Payload blob directory name
pub const REPO_DIR: &str = "repo";

/// Fail unless `version` is readable
///
/// # Errors
/// `ArchiveError::VersionIncompatible`
pub fn check_version(version: &str) -> Result<(), ArchiveError> {
    if SUPPORTED_VERSIONS.contains(&version) {
        Ok(())
    } else {
        Err(ArchiveError::VersionIncompatible {
            found: version.to_string(),
            supported: SUPPORTED_VERSIONS.join(", "),
        })
    }
}

/// Parameters an archive was exported with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportParameters {
    pub include_logs: bool,
    pub include_comments: bool,
    /// Effective export rule set
    pub rules: BTreeMap<String, bool>,
}

/// Archive manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: String,
    pub entity_counts: BTreeMap<EntityKind, usize>,
    /// Free-form notes from format migrations
    #[serde(default)]
    pub conversion_info: Vec<String>,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub export_parameters: ExportParameters,
    #[serde(default)]
    pub link_count: usize,
    /// Content hash of every repository blob
    #[serde(default)]
    pub repository: BTreeMap<Uuid, ContentHash>,
    /// Content hash of the data file; set when written to disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_hash: Option<ContentHash>,
}

impl Manifest {
    /// Manifest for the current format version
    #[must_use]
    pub fn new(export_parameters: ExportParameters) -> Self {
        Self {
            format_version: ARCHIVE_FORMAT_VERSION.to_string(),
            entity_counts: BTreeMap::new(),
            conversion_info: Vec::new(),
            created: Utc::now(),
            export_parameters,
            link_count: 0,
            repository: BTreeMap::new(),
            data_hash: None,
        }
    }

    /// Recorded count for one kind
    #[inline]
    #[must_use]
    pub fn count(&self, kind: EntityKind) -> usize {
        self.entity_counts.get(&kind).copied().unwrap_or(0)
    }
}

/// Link between two archived nodes, by uuid
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkRecord {
    pub input: Uuid,
    pub output: Uuid,
    pub label: String,
    #[serde(rename = "type")]
    pub link_type: LinkType,
}

#[derive(Serialize)]
struct DataRef<'a> {
    entities: &'a IndexMap<Uuid, EntityRecord>,
    links: &'a [LinkRecord],
}

#[derive(Deserialize)]
struct Data {
    entities: IndexMap<Uuid, EntityRecord>,
    links: Vec<LinkRecord>,
}

/// A self-contained export of a node closure
#[derive(Debug, Clone, PartialEq)]
pub struct Archive {
    pub manifest: Manifest,
    /// Entity table in dependency order
    pub entities: IndexMap<Uuid, EntityRecord>,
    /// Deduplicated, sorted link list
    pub links: Vec<LinkRecord>,
    /// Payload blobs by node uuid
    pub repository: BTreeMap<Uuid, Vec<u8>>,
}

impl Archive {
    /// Assemble an archive and fill in the manifest counts and hashes
    ///
    /// Links are sorted and deduplicated.
    #[must_use]
    pub fn new(
        mut manifest: Manifest,
        entities: IndexMap<Uuid, EntityRecord>,
        mut links: Vec<LinkRecord>,
        repository: BTreeMap<Uuid, Vec<u8>>,
    ) -> Self {
        links.sort();
        links.dedup();

        manifest.entity_counts = EntityKind::ALL
            .into_iter()
            .map(|kind| (kind, entities.values().filter(|r| r.kind() == kind).count()))
            .collect();
        manifest.link_count = links.len();
        manifest.repository = repository
            .iter()
            .map(|(uuid, blob)| (*uuid, ContentHash::compute(blob)))
            .collect();

        Self {
            manifest,
            entities,
            links,
            repository,
        }
    }

    /// Records of one kind, in table order
    pub fn records(&self, kind: EntityKind) -> impl Iterator<Item = &EntityRecord> + '_ {
        self.entities.values().filter(move |r| r.kind() == kind)
    }

    /// Node records, in table order
    pub fn nodes(&self) -> impl Iterator<Item = &NodeRecord> + '_ {
        self.entities.values().filter_map(EntityRecord::as_node)
    }

    /// Check table keys, counts and blob hashes against the manifest
    ///
    /// # Errors
    /// `ArchiveError::Integrity` on the first mismatch
    pub fn verify(&self) -> Result<(), ArchiveError> {
        for (key, record) in &self.entities {
            if *key != record.uuid() {
                return Err(ArchiveError::integrity(
                    format!("entity table key {key}"),
                    key,
                    record.uuid(),
                ));
            }
        }

        for kind in EntityKind::ALL {
            let actual = self.records(kind).count();
            let expected = self.manifest.count(kind);
            if actual != expected {
                return Err(ArchiveError::integrity(
                    format!("{kind} count"),
                    expected,
                    actual,
                ));
            }
        }

        for (uuid, blob) in &self.repository {
            let Some(expected) = self.manifest.repository.get(uuid) else {
                return Err(ArchiveError::integrity(
                    format!("payload {uuid}"),
                    "manifest entry",
                    "none",
                ));
            };
            if !expected.verify(blob) {
                return Err(ArchiveError::integrity(
                    format!("payload {uuid}"),
                    expected,
                    ContentHash::compute(blob),
                ));
            }
        }
        Ok(())
    }

    /// Write the archive as a folder at `path`
    ///
    /// Files are staged in a temporary sibling directory that is renamed
    /// into place once complete, so a failed write leaves no archive.
    ///
    /// # Errors
    /// `ArchiveError::ArchiveExists` if `path` exists and `overwrite` is
    /// false; IO and serialization failures
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub fn write_folder(&self, path: &Path, overwrite: bool) -> Result<(), ArchiveError> {
        if path.exists() && !overwrite {
            return Err(ArchiveError::ArchiveExists(path.to_path_buf()));
        }

        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| ArchiveError::io_error(&parent, e))?;
        let staging = tempfile::Builder::new()
            .prefix(".prov-archive-")
            .tempdir_in(&parent)
            .map_err(|e| ArchiveError::io_error(&parent, e))?;

        let data = serde_json::to_vec_pretty(&DataRef {
            entities: &self.entities,
            links: &self.links,
        })?;
        write_file(&staging.path().join(DATA_FILE), &data)?;

        let repo = staging.path().join(REPO_DIR);
        fs::create_dir(&repo).map_err(|e| ArchiveError::io_error(&repo, e))?;
        for (uuid, blob) in &self.repository {
            write_file(&repo.join(uuid.to_string()), blob)?;
            if let Some(hash) = self.manifest.repository.get(uuid) {
                tracing::debug!("Staged payload {} ({})", uuid, hash.short());
            }
        }

        let mut manifest = self.manifest.clone();
        manifest.data_hash = Some(ContentHash::compute(&data));
        write_file(
            &staging.path().join(METADATA_FILE),
            &serde_json::to_vec_pretty(&manifest)?,
        )?;

        if path.is_dir() {
            fs::remove_dir_all(path).map_err(|e| ArchiveError::io_error(path, e))?;
        } else if path.exists() {
            fs::remove_file(path).map_err(|e| ArchiveError::io_error(path, e))?;
        }
        fs::rename(staging.path(), path).map_err(|e| ArchiveError::io_error(path, e))?;

        tracing::info!(
            "Wrote archive with {} entities and {} links",
            self.entities.len(),
            self.links.len()
        );
        Ok(())
    }

    /// Read an archive folder
    ///
    /// The format version is checked before the entity table is parsed,
    /// and every payload blob is verified against its manifest hash.
    ///
    /// # Errors
    /// `VersionIncompatible`, `Integrity`, IO and serialization failures
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub fn read_folder(path: &Path) -> Result<Self, ArchiveError> {
        let raw: Value = serde_json::from_slice(&read_file(&path.join(METADATA_FILE))?)?;
        let version = raw
            .get("format_version")
            .and_then(Value::as_str)
            .unwrap_or_default();
        check_version(version)?;
        let manifest: Manifest = serde_json::from_value(raw)?;

        let data = read_file(&path.join(DATA_FILE))?;
        if let Some(expected) = manifest.data_hash {
            if !expected.verify(&data) {
                return Err(ArchiveError::integrity(
                    DATA_FILE,
                    expected,
                    ContentHash::compute(&data),
                ));
            }
        }
        let Data { entities, links } = serde_json::from_slice(&data)?;

        let repo = path.join(REPO_DIR);
        let mut repository = BTreeMap::new();
        for uuid in manifest.repository.keys() {
            repository.insert(*uuid, read_file(&repo.join(uuid.to_string()))?);
        }

        let archive = Self {
            manifest,
            entities,
            links,
            repository,
        };
        archive.verify()?;
        tracing::debug!("Read archive with {} entities", archive.entities.len());
        Ok(archive)
    }
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), ArchiveError> {
    fs::write(path, contents).map_err(|e| ArchiveError::io_error(path, e))
}

fn read_file(path: &Path) -> Result<Vec<u8>, ArchiveError> {
    fs::read(path).map_err(|e| ArchiveError::io_error(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use prov_graph::{NodeType, UserRecord};
    use tempfile::TempDir;

    fn sample() -> Archive {
        let user = UserRecord {
            uuid: Uuid::new_v4(),
            email: "a@example.org".to_string(),
            first_name: "A".to_string(),
            last_name: "B".to_string(),
            institution: String::new(),
        };
        let data = NodeRecord::new(NodeType::Data, user.uuid).with_label("structure");
        let calc = NodeRecord::new(NodeType::Calculation, user.uuid).sealed();
        let link = LinkRecord {
            input: data.uuid,
            output: calc.uuid,
            label: "structure".to_string(),
            link_type: LinkType::InputCalc,
        };

        let mut entities = IndexMap::new();
        let mut repository = BTreeMap::new();
        repository.insert(data.uuid, b"POSCAR".to_vec());
        entities.insert(user.uuid, EntityRecord::User(user));
        entities.insert(data.uuid, EntityRecord::Node(data));
        entities.insert(calc.uuid, EntityRecord::Node(calc));

        Archive::new(
            Manifest::new(ExportParameters::default()),
            entities,
            vec![link.clone(), link],
            repository,
        )
    }

    #[test]
    fn new_fills_manifest() {
        let archive = sample();
        assert_eq!(archive.manifest.count(EntityKind::Node), 2);
        assert_eq!(archive.manifest.count(EntityKind::User), 1);
        assert_eq!(archive.manifest.count(EntityKind::Group), 0);
        assert_eq!(archive.links.len(), 1);
        assert_eq!(archive.manifest.link_count, 1);
        assert_eq!(archive.manifest.repository.len(), 1);
        assert!(archive.verify().is_ok());
    }

    #[test]
    fn version_check() {
        assert!(check_version(ARCHIVE_FORMAT_VERSION).is_ok());
        assert!(matches!(
            check_version("0.4"),
            Err(ArchiveError::VersionIncompatible { .. })
        ));
    }

    #[test]
    fn link_record_uses_type_key() {
        let archive = sample();
        let value = serde_json::to_value(&archive.links[0]).unwrap();
        assert_eq!(value["type"], "input_calc");
    }

    #[test]
    fn folder_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("export");
        let archive = sample();

        archive.write_folder(&path, false).unwrap();
        assert!(path.join(METADATA_FILE).is_file());
        assert!(path.join(DATA_FILE).is_file());

        let read = Archive::read_folder(&path).unwrap();
        assert_eq!(read.entities, archive.entities);
        assert_eq!(read.links, archive.links);
        assert_eq!(read.repository, archive.repository);
        assert!(read.manifest.data_hash.is_some());
    }

    #[test]
    fn existing_target_requires_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("export");
        let archive = sample();
        archive.write_folder(&path, false).unwrap();

        assert!(matches!(
            archive.write_folder(&path, false),
            Err(ArchiveError::ArchiveExists(_))
        ));
        archive.write_folder(&path, true).unwrap();
        assert!(Archive::read_folder(&path).is_ok());
    }

    #[test]
    fn tampered_payload_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("export");
        let archive = sample();
        archive.write_folder(&path, false).unwrap();

        let (uuid, _) = archive.repository.iter().next().unwrap();
        fs::write(path.join(REPO_DIR).join(uuid.to_string()), b"tampered").unwrap();

        assert!(matches!(
            Archive::read_folder(&path),
            Err(ArchiveError::Integrity { .. })
        ));
    }

    #[test]
    fn tampered_data_file_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("export");
        sample().write_folder(&path, false).unwrap();

        let data_path = path.join(DATA_FILE);
        let mut data: Value = serde_json::from_slice(&fs::read(&data_path).unwrap()).unwrap();
        data["links"] = Value::Array(Vec::new());
        fs::write(&data_path, serde_json::to_vec(&data).unwrap()).unwrap();

        let err = Archive::read_folder(&path).unwrap_err();
        assert!(matches!(err, ArchiveError::Integrity { ref what, .. } if what == DATA_FILE));
    }

    #[test]
    fn unsupported_version_rejected_before_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("export");
        sample().write_folder(&path, false).unwrap();

        let meta = path.join(METADATA_FILE);
        let mut manifest: Value = serde_json::from_slice(&fs::read(&meta).unwrap()).unwrap();
        manifest["format_version"] = Value::from("99.0");
        fs::write(&meta, serde_json::to_vec(&manifest).unwrap()).unwrap();
        // A broken data file must not be reached
        fs::write(path.join(DATA_FILE), b"not json").unwrap();

        assert!(matches!(
            Archive::read_folder(&path),
            Err(ArchiveError::VersionIncompatible { .. })
        ));
    }
}
