use std::path::{Path, PathBuf};

use facegate_core::{FilesystemEnrollmentStore, Threshold};
use serde::Serialize;

use crate::errors::AppResult;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordSummary {
    pub id: String,
    pub alias: String,
    pub user: String,
    pub threshold: Threshold,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FacesListOutcome {
    pub store_dir: PathBuf,
    pub records: Vec<RecordSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FacesRemoveOutcome {
    pub id: String,
    pub removed: PathBuf,
}

pub fn run_faces_list(store_dir: &Path) -> AppResult<FacesListOutcome> {
    let store = FilesystemEnrollmentStore::new(store_dir);
    let records = store
        .list()?
        .into_iter()
        .map(|record| RecordSummary {
            id: record.id,
            alias: record.alias,
            user: record.account.username,
            threshold: record.threshold,
            created_at: record.created_at,
        })
        .collect();
    Ok(FacesListOutcome {
        store_dir: store_dir.to_path_buf(),
        records,
    })
}

pub fn run_faces_remove(store_dir: &Path, id: &str) -> AppResult<FacesRemoveOutcome> {
    let store = FilesystemEnrollmentStore::new(store_dir);
    let removed = store.remove(id)?;
    Ok(FacesRemoveOutcome {
        id: id.to_string(),
        removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_core::{
        AccountIdentity, EncodedImage, EnrollmentRecord, EnrollmentStore, ImageFormat,
    };
    use tempfile::tempdir;

    use crate::errors::AppError;

    fn record(user: &str) -> EnrollmentRecord {
        EnrollmentRecord {
            alias: "desk".into(),
            reference_image: EncodedImage::new(ImageFormat::Png, vec![1, 2, 3]),
            threshold: Threshold::new(70).unwrap(),
            account: AccountIdentity::new(user),
        }
    }

    #[test]
    fn lists_then_removes_a_record() {
        let dir = tempdir().unwrap();
        let store = FilesystemEnrollmentStore::new(dir.path());
        let handle = store.save_face_registration(&record("alice")).unwrap();

        let listed = run_faces_list(dir.path()).unwrap();
        assert_eq!(listed.records.len(), 1);
        assert_eq!(listed.records[0].id, handle.id);
        assert_eq!(listed.records[0].user, "alice");
        assert_eq!(listed.records[0].threshold.value(), 70);

        let removed = run_faces_remove(dir.path(), &handle.id).unwrap();
        assert_eq!(removed.removed, handle.path);
        assert!(run_faces_list(dir.path()).unwrap().records.is_empty());
    }

    #[test]
    fn removing_unknown_id_is_validation_error() {
        let dir = tempdir().unwrap();
        let err = run_faces_remove(dir.path(), "not-a-uuid").unwrap_err();
        assert!(matches!(err, AppError::Session(_)));
        assert_eq!(err.exit_status(), 2);
    }
}
