use std::env;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{AccountIdentity, EnrollmentRecord, EnrollmentStore, RecordHandle};
use crate::errors::{SessionError, SessionResult};
use crate::frame::EncodedImage;
use crate::scorer::Threshold;

pub const DEFAULT_STORE_DIR: &str = "/var/lib/facegate/faces";
pub const STORE_DIR_ENV: &str = "FACEGATE_STORE_DIR";
const RECORD_EXTENSION: &str = "face";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredEnrollment {
    pub id: String,
    pub alias: String,
    pub account: AccountIdentity,
    pub threshold: Threshold,
    pub reference_image: EncodedImage,
    pub created_at: String,
}

pub trait StoreDirResolver {
    fn resolve(&self, override_dir: Option<&Path>) -> PathBuf;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvStoreDirResolver;

impl StoreDirResolver for EnvStoreDirResolver {
    fn resolve(&self, override_dir: Option<&Path>) -> PathBuf {
        if let Some(dir) = override_dir {
            dir.to_path_buf()
        } else if let Ok(env_value) = env::var(STORE_DIR_ENV) {
            PathBuf::from(env_value)
        } else {
            PathBuf::from(DEFAULT_STORE_DIR)
        }
    }
}

/// One `<uuid>.face` JSON document per enrollment.
#[derive(Debug, Clone)]
pub struct FilesystemEnrollmentStore {
    dir: PathBuf,
}

impl FilesystemEnrollmentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_resolver<R: StoreDirResolver>(resolver: &R, override_dir: Option<&Path>) -> Self {
        Self::new(resolver.resolve(override_dir))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{RECORD_EXTENSION}"))
    }

    /// All readable records, oldest first. Unparseable files are skipped.
    pub fn list(&self) -> SessionResult<Vec<StoredEnrollment>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(SessionError::storage(&self.dir, err)),
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry.map_err(|err| SessionError::storage(&self.dir, err))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match read_record(&path) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(target: "store", path = %path.display(), error = %err, "skipping unreadable record")
                }
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    pub fn load(&self, id: &str) -> SessionResult<StoredEnrollment> {
        let id = validate_id(id)?;
        let path = self.record_path(&id);
        if !path.exists() {
            return Err(SessionError::Validation(format!("no enrollment with id {id}")));
        }
        read_record(&path)
    }

    pub fn remove(&self, id: &str) -> SessionResult<PathBuf> {
        let id = validate_id(id)?;
        let path = self.record_path(&id);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(target: "store", path = %path.display(), "enrollment removed");
                Ok(path)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(SessionError::Validation(
                format!("no enrollment with id {id}"),
            )),
            Err(err) => Err(SessionError::storage(&path, err)),
        }
    }
}

impl EnrollmentStore for FilesystemEnrollmentStore {
    fn save_face_registration(&self, record: &EnrollmentRecord) -> SessionResult<RecordHandle> {
        if record.reference_image.is_empty() {
            return Err(SessionError::Validation("reference image is empty".into()));
        }
        if record.account.username.trim().is_empty() {
            return Err(SessionError::Validation("account user name is required".into()));
        }

        let id = Uuid::new_v4().to_string();
        let stored = StoredEnrollment {
            id: id.clone(),
            alias: record.alias.clone(),
            account: record.account.clone(),
            threshold: record.threshold,
            reference_image: record.reference_image.clone(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        let path = self.record_path(&id);
        write_record(&path, &stored)?;
        debug!(target: "store", path = %path.display(), "enrollment written");
        Ok(RecordHandle { id, path })
    }
}

fn validate_id(id: &str) -> SessionResult<String> {
    Uuid::parse_str(id.trim())
        .map(|uuid| uuid.to_string())
        .map_err(|_| SessionError::Validation(format!("'{id}' is not a valid enrollment id")))
}

fn read_record(path: &Path) -> SessionResult<StoredEnrollment> {
    let data = fs::read(path).map_err(|err| SessionError::storage(path, err))?;
    serde_json::from_slice(&data)
        .map_err(|err| SessionError::storage(path, format!("invalid record contents: {err}")))
}

fn write_record(path: &Path, record: &StoredEnrollment) -> SessionResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| SessionError::storage(parent, err))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|err| SessionError::storage(path, err))?;
    {
        let file = tmp.as_file_mut();
        {
            let mut writer = BufWriter::new(&mut *file);
            serde_json::to_writer_pretty(&mut writer, record)
                .map_err(|err| SessionError::storage(path, err))?;
            writer
                .write_all(b"\n")
                .and_then(|_| writer.flush())
                .map_err(|err| SessionError::storage(path, err))?;
        }
        file.sync_all()
            .map_err(|err| SessionError::storage(path, err))?;
    }

    let file = tmp
        .persist(path)
        .map_err(|err| SessionError::storage(path, err.error))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = file
            .metadata()
            .map_err(|err| SessionError::storage(path, err))?
            .permissions();
        perms.set_mode(0o600);
        file.set_permissions(perms)
            .map_err(|err| SessionError::storage(path, err))?;
    }
    #[cfg(not(unix))]
    drop(file);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ImageFormat;
    use tempfile::TempDir;

    fn sample_record(alias: &str) -> EnrollmentRecord {
        EnrollmentRecord {
            alias: alias.into(),
            reference_image: EncodedImage::new(ImageFormat::Png, vec![1, 2, 3, 4]),
            threshold: Threshold::new(60).unwrap(),
            account: AccountIdentity::new("alice"),
        }
    }

    #[test]
    fn save_writes_record_named_by_uuid() {
        let tmp = TempDir::new().unwrap();
        let store = FilesystemEnrollmentStore::new(tmp.path().join("faces"));

        let handle = store.save_face_registration(&sample_record("desk")).unwrap();
        assert!(Uuid::parse_str(&handle.id).is_ok());
        assert_eq!(handle.path, store.record_path(&handle.id));

        let loaded = store.load(&handle.id).unwrap();
        assert_eq!(loaded.alias, "desk");
        assert_eq!(loaded.account.username, "alice");
        assert_eq!(loaded.threshold.value(), 60);
        assert_eq!(loaded.reference_image.bytes(), &[1, 2, 3, 4]);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&handle.path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn save_rejects_missing_identity_without_writing() {
        let tmp = TempDir::new().unwrap();
        let store = FilesystemEnrollmentStore::new(tmp.path());
        let mut record = sample_record("");
        record.account = AccountIdentity::new("  ");

        let err = store.save_face_registration(&record).unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn save_into_unwritable_location_is_a_storage_error() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        fs::write(&blocker, b"file").unwrap();
        let store = FilesystemEnrollmentStore::new(&blocker);

        let err = store.save_face_registration(&sample_record("x")).unwrap_err();
        assert!(matches!(err, SessionError::Storage { .. }));
    }

    #[test]
    fn list_skips_foreign_and_corrupt_files() {
        let tmp = TempDir::new().unwrap();
        let store = FilesystemEnrollmentStore::new(tmp.path());
        let first = store.save_face_registration(&sample_record("one")).unwrap();
        let second = store.save_face_registration(&sample_record("two")).unwrap();
        fs::write(tmp.path().join("notes.txt"), b"hello").unwrap();
        fs::write(tmp.path().join("broken.face"), b"{not json").unwrap();

        let ids: Vec<String> = store.list().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first.id));
        assert!(ids.contains(&second.id));
    }

    #[test]
    fn list_of_missing_directory_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = FilesystemEnrollmentStore::new(tmp.path().join("absent"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn remove_deletes_record_and_reports_unknown_ids() {
        let tmp = TempDir::new().unwrap();
        let store = FilesystemEnrollmentStore::new(tmp.path());
        let handle = store.save_face_registration(&sample_record("gone")).unwrap();

        let removed = store.remove(&handle.id).unwrap();
        assert!(!removed.exists());

        let err = store.remove(&handle.id).unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)));
        let err = store.remove("../../etc/passwd").unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)));
    }

    #[test]
    fn resolver_prefers_override() {
        let resolver = EnvStoreDirResolver;
        let dir = resolver.resolve(Some(Path::new("/tmp/custom-faces")));
        assert_eq!(dir, PathBuf::from("/tmp/custom-faces"));
    }
}
