#![cfg(feature = "inmem-store")]

mod common;

use std::io::Cursor;

use campus::error::ApiError;
use campus::profiles;
use campus::storage::{Bucket, ObjectStoreError};
use common::{fixture, student};
use image::{ImageFormat, RgbImage};

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    RgbImage::new(width, height).write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

fn key_of(url: &str) -> &str {
    url.trim_start_matches("/storage/avatars/")
}

#[tokio::test]
async fn new_avatar_replaces_the_stored_object() {
    let fx = fixture();
    let a = student(&fx.state, "Asha").await;

    let first = profiles::upload_avatar(&fx.state, a, "me.png", png(32, 32)).await.unwrap();
    let first_url = first.avatar_url.unwrap();
    assert!(first_url.ends_with("_me.jpg"), "{first_url}");
    assert!(fx.state.objects.get(Bucket::Avatars, key_of(&first_url)).await.is_ok());

    let second = profiles::upload_avatar(&fx.state, a, "me-again.png", png(32, 32)).await.unwrap();
    let second_url = second.avatar_url.unwrap();
    assert_ne!(first_url, second_url);
    assert!(fx.state.objects.get(Bucket::Avatars, key_of(&second_url)).await.is_ok());
    assert!(matches!(
        fx.state.objects.get(Bucket::Avatars, key_of(&first_url)).await,
        Err(ObjectStoreError::NotFound)
    ));
}

#[tokio::test]
async fn avatar_must_be_an_image() {
    let fx = fixture();
    let a = student(&fx.state, "Asha").await;
    let err = profiles::upload_avatar(&fx.state, a, "cv.txt", b"not an image".to_vec()).await.unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));
}
