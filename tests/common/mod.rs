#![allow(dead_code)]

use std::sync::Arc;

use campus::auth::{create_jwt, Claims, UserMetadata};
use campus::models::{Id, Role};
use campus::profiles::ensure_profile;
use campus::repo::inmem::InMemRepo;
use campus::storage::FsObjectStore;
use campus::uploads::LocalUploads;
use campus::AppState;
use tempfile::TempDir;
use uuid::Uuid;

pub const INSTITUTE: &str = "NITK";

/// Backend handle over a fresh in-memory repo; files live in a temp dir that
/// is removed when the fixture drops.
pub struct Fixture {
    pub state: AppState,
    pub dir: TempDir,
}

pub fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let objects = FsObjectStore::new(dir.path().join("storage"), "/storage");
    let uploads = LocalUploads::new(dir.path().join("uploads"), 1024 * 1024);
    let state = AppState::new(Arc::new(InMemRepo::new()), Arc::new(objects), uploads);
    Fixture { state, dir }
}

pub fn set_secret() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
}

pub fn claims(role: Role, name: &str) -> Claims {
    Claims {
        sub: Uuid::new_v4(),
        email: format!("{}@example.edu", name.to_lowercase()),
        exp: usize::MAX,
        metadata: UserMetadata {
            role,
            full_name: Some(name.to_string()),
            branch: Some("CSE".into()),
            semester: Some(3),
            institute_code: Some(INSTITUTE.into()),
        },
    }
}

/// Creates the profile row the way the first authenticated request would.
pub async fn user(state: &AppState, role: Role, name: &str) -> Claims {
    let c = claims(role, name);
    ensure_profile(state, &c).await.unwrap();
    c
}

pub async fn student(state: &AppState, name: &str) -> Id {
    user(state, Role::Student, name).await.sub
}

pub fn token(c: &Claims) -> String {
    set_secret();
    create_jwt(c.sub, &c.email, c.metadata.clone()).unwrap()
}

pub fn bearer(c: &Claims) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", token(c)))
}
