mod common;

use agora::storage::{upload_image, upload_images, Bucket, ImageFile};
use common::{Harness, Op};
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn upload_image_stores_file_and_returns_public_url() {
    let harness = Harness::new();
    let remote = harness.remote();

    let file = ImageFile::new("me.png", vec![1u8, 2, 3]);
    let url = assert_ok!(upload_image(remote.as_ref(), Bucket::Avatars, &file).await);

    assert!(url.starts_with("http://localhost:8000/storage/avatars/"));
    assert!(url.ends_with(".png"));

    let name = url.rsplit('/').next().unwrap();
    let stored = harness.temp_dir.path().join("uploads").join("avatars").join(name);
    assert_eq!(std::fs::read(stored).unwrap(), vec![1u8, 2, 3]);
}

#[tokio::test]
async fn uploads_get_unique_names() {
    let harness = Harness::new();
    let remote = harness.remote();

    let file = ImageFile::new("photo", vec![9u8]);
    let first = upload_image(remote.as_ref(), Bucket::Posts, &file).await.unwrap();
    let second = upload_image(remote.as_ref(), Bucket::Posts, &file).await.unwrap();
    assert_ne!(first, second);
    assert!(first.ends_with(".jpeg"));
}

#[tokio::test]
async fn upload_images_skips_empty_files() {
    let harness = Harness::new();
    let remote = harness.remote();

    let files = vec![
        ImageFile::new("a.jpg", vec![1u8]),
        ImageFile::new("empty.jpg", Vec::<u8>::new()),
        ImageFile::new("b.jpg", vec![2u8]),
    ];
    let (urls, error) = upload_images(remote.as_ref(), Bucket::Posts, &files).await;
    assert!(error.is_none());
    assert_eq!(urls.len(), 2);
}

#[tokio::test]
async fn upload_images_returns_partial_results_on_failure() {
    let harness = Harness::new();
    let remote = harness.remote();
    harness.flaky.fail(Op::Upload, "banners");

    let files = vec![ImageFile::new("a.jpg", vec![1u8])];
    let (urls, error) = upload_images(remote.as_ref(), Bucket::Banners, &files).await;
    assert!(urls.is_empty());
    assert!(error.is_some());

    harness.flaky.heal();
    let (urls, error) = upload_images(remote.as_ref(), Bucket::Banners, &files).await;
    assert_eq!(urls.len(), 1);
    assert!(error.is_none());
}

#[tokio::test]
async fn empty_single_upload_is_rejected() {
    let harness = Harness::new();
    let remote = harness.remote();

    let file = ImageFile::new("nothing.png", Vec::<u8>::new());
    let err = assert_err!(upload_image(remote.as_ref(), Bucket::Avatars, &file).await);
    assert!(matches!(err, agora::error::AppError::BadRequest(_)));
}
