#![cfg(feature = "inmem-store")]

use campus::models::{NewProfile, Role};
use campus::repo::inmem::InMemRepo;
use campus::repo::ProfileRepo;
use uuid::Uuid;

fn profile(name: &str) -> NewProfile {
    NewProfile {
        id: Uuid::new_v4(),
        full_name: name.into(),
        avatar_url: None,
        role: Role::Student,
        branch: None,
        semester: None,
        institute_code: Some("NITK".into()),
    }
}

#[tokio::test]
async fn snapshot_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    let created = InMemRepo::with_snapshot_dir(&data).create_profile(profile("Asha")).await.unwrap();
    assert!(data.join("state.json").exists());

    let reopened = InMemRepo::with_snapshot_dir(&data);
    assert_eq!(reopened.get_profile(created.id).await.unwrap().full_name, "Asha");
}

#[tokio::test]
async fn unwritable_snapshot_dir_keeps_serving_from_memory() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();

    let repo = InMemRepo::with_snapshot_dir(blocker.join("data"));
    let created = repo.create_profile(profile("Bala")).await.unwrap();
    assert_eq!(repo.get_profile(created.id).await.unwrap().full_name, "Bala");
    assert!(!blocker.join("data").exists());
}
