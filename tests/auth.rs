use actix_web::{dev::Payload, test, FromRequest};
use campus::{
    auth::{create_jwt, Auth, Claims, UserMetadata},
    models::Role,
    require_role,
};
use std::env;
use uuid::Uuid;

// Helper that guarantees a sufficiently long secret for tests.
fn set_secret() {
    env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
}

fn metadata(role: Role, institute: Option<&str>) -> UserMetadata {
    UserMetadata {
        role,
        full_name: Some("Asha Rao".into()),
        branch: Some("CSE".into()),
        semester: Some(3),
        institute_code: institute.map(Into::into),
    }
}

fn auth(role: Role) -> Auth {
    Auth(Claims { sub: Uuid::new_v4(), email: "a@example.edu".into(), exp: usize::MAX, metadata: metadata(role, None) })
}

#[actix_web::test]
async fn jwt_roundtrip_keeps_metadata() {
    set_secret();
    let id = Uuid::new_v4();
    let token = create_jwt(id, "asha@example.edu", metadata(Role::Teacher, Some("NITK"))).expect("token");
    // The Auth extractor is the public way to validate, so use it here.
    let req = test::TestRequest::default()
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .to_http_request();
    let mut pl = Payload::None;
    let auth = Auth::from_request(&req, &mut pl).await.expect("extract");
    assert_eq!(auth.user_id(), id);
    assert_eq!(auth.0.metadata.role, Role::Teacher);
    assert_eq!(auth.0.email, "asha@example.edu");
    assert_eq!(auth.0.metadata, metadata(Role::Teacher, Some("NITK")));
}

#[actix_web::test]
async fn extractor_rejects_invalid_token() {
    set_secret();
    let req = test::TestRequest::default()
        .insert_header(("Authorization", "Bearer notatoken"))
        .to_http_request();
    let mut pl = Payload::None;
    assert!(Auth::from_request(&req, &mut pl).await.is_err());
}

#[actix_web::test]
async fn extractor_requires_header() {
    let req = test::TestRequest::default().to_http_request();
    let mut pl = Payload::None;
    assert!(Auth::from_request(&req, &mut pl).await.is_err());
}

#[actix_web::test]
async fn require_role_macro_enforces_roles() {
    fn guarded(a: Auth) -> actix_web::Result<()> {
        require_role!(a, Role::Teacher | Role::InstituteAdmin);
        Ok(())
    }
    assert!(guarded(auth(Role::Teacher)).is_ok());
    assert!(guarded(auth(Role::InstituteAdmin)).is_ok());
    assert!(guarded(auth(Role::Student)).is_err());
}

#[::core::prelude::v1::test]
fn audience_needs_an_institute() {
    let without = auth(Role::Student).0;
    assert!(without.audience().is_none());

    let with = Claims { metadata: metadata(Role::Student, Some("NITK")), ..without };
    let audience = with.audience().expect("audience");
    assert_eq!(audience.user_id, with.sub);
    assert_eq!(audience.institute_code, "NITK");
    assert_eq!(audience.branch.as_deref(), Some("CSE"));
    assert_eq!(audience.semester, Some(3));
}
