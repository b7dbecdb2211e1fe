//! Reference resolution, environment replacement and auto import
//!
//! Each test uses its own environment variable names since tests in this
//! binary share one process environment.

mod common;

use berglas::auto::{import, ImportOptions};
use berglas::runtime::StaticEnvironment;
use berglas::{Context, CreateRequest, ErrorKind};
use common::{harness, Harness, BUCKET, KEY, PROJECT};
use std::collections::BTreeMap;

async fn seed(h: &Harness) {
    let ctx = Context::new();
    h.client
        .create(
            &ctx,
            CreateRequest::Storage {
                bucket: BUCKET.to_string(),
                object: "db-password".to_string(),
                key: KEY.to_string(),
                plaintext: b"hunter2".to_vec(),
            },
        )
        .await
        .unwrap();
    h.client
        .create(
            &ctx,
            CreateRequest::SecretManager {
                project: PROJECT.to_string(),
                name: "api-token".to_string(),
                plaintext: b"tok-123".to_vec(),
                locations: Vec::new(),
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_resolve_returns_plaintext() {
    let h = harness();
    seed(&h).await;
    let ctx = Context::new();

    let storage = h
        .client
        .resolve(&ctx, &format!("berglas://{BUCKET}/db-password"))
        .await
        .unwrap();
    assert_eq!(storage, b"hunter2");

    let sm = h
        .client
        .resolve(&ctx, &format!("sm://{PROJECT}/api-token#1"))
        .await
        .unwrap();
    assert_eq!(sm, b"tok-123");
}

#[tokio::test]
async fn test_resolve_invalid_reference() {
    let h = harness();
    let err = h
        .client
        .resolve(&Context::new(), "not-a-reference")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidReference);
}

#[tokio::test]
async fn test_resolve_to_explicit_destination() {
    let h = harness();
    seed(&h).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("password");

    let resolved = h
        .client
        .resolve(
            &Context::new(),
            &format!("berglas://{BUCKET}/db-password?destination={}", path.display()),
        )
        .await
        .unwrap();

    assert_eq!(resolved, path.to_string_lossy().as_bytes());
    assert_eq!(std::fs::read(&path).unwrap(), b"hunter2");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

#[tokio::test]
async fn test_resolve_to_tempfile() {
    let h = harness();
    seed(&h).await;

    let resolved = h
        .client
        .resolve(
            &Context::new(),
            &format!("sm://{PROJECT}/api-token?destination=tempfile"),
        )
        .await
        .unwrap();
    let path = std::path::PathBuf::from(String::from_utf8(resolved).unwrap());
    assert_eq!(std::fs::read(&path).unwrap(), b"tok-123");
    std::fs::remove_file(path).unwrap();
}

#[tokio::test]
async fn test_replace_overwrites_variable() {
    let h = harness();
    seed(&h).await;
    std::env::set_var(
        "BERGLAS_TEST_REPLACE_DB",
        format!("berglas://{BUCKET}/db-password"),
    );

    h.client
        .replace(&Context::new(), "BERGLAS_TEST_REPLACE_DB")
        .await
        .unwrap();
    assert_eq!(std::env::var("BERGLAS_TEST_REPLACE_DB").unwrap(), "hunter2");
}

#[tokio::test]
async fn test_replace_unset_variable_is_misuse() {
    let h = harness();
    let err = h
        .client
        .replace(&Context::new(), "BERGLAS_TEST_NEVER_SET")
        .await
        .unwrap_err();
    assert!(err.is_misuse());
}

fn vars(pairs: &[(&str, String)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

#[tokio::test]
async fn test_import_replaces_only_references() {
    let h = harness();
    seed(&h).await;
    std::env::set_var("BERGLAS_TEST_IMPORT_PLAIN", "untouched");
    let runtime = StaticEnvironment::new(vars(&[
        ("BERGLAS_TEST_IMPORT_DB", format!("berglas://{BUCKET}/db-password")),
        ("BERGLAS_TEST_IMPORT_TOKEN", format!("sm://{PROJECT}/api-token")),
        ("BERGLAS_TEST_IMPORT_PLAIN", "plain value".to_string()),
    ]));

    let report = import(&h.client, &Context::new(), &runtime, ImportOptions::default())
        .await
        .unwrap();

    assert_eq!(
        report.replaced,
        vec!["BERGLAS_TEST_IMPORT_DB", "BERGLAS_TEST_IMPORT_TOKEN"]
    );
    assert!(report.failed.is_empty());
    assert_eq!(std::env::var("BERGLAS_TEST_IMPORT_DB").unwrap(), "hunter2");
    assert_eq!(std::env::var("BERGLAS_TEST_IMPORT_TOKEN").unwrap(), "tok-123");
    assert_eq!(std::env::var("BERGLAS_TEST_IMPORT_PLAIN").unwrap(), "untouched");
}

#[tokio::test]
async fn test_import_stops_on_first_failure() {
    let h = harness();
    seed(&h).await;
    let runtime = StaticEnvironment::new(vars(&[
        ("BERGLAS_TEST_STOP_A", format!("berglas://{BUCKET}/missing")),
        ("BERGLAS_TEST_STOP_B", format!("sm://{PROJECT}/api-token")),
    ]));

    let err = import(&h.client, &Context::new(), &runtime, ImportOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(std::env::var("BERGLAS_TEST_STOP_B").is_err());
}

#[tokio::test]
async fn test_import_continue_on_error() {
    let h = harness();
    seed(&h).await;
    let runtime = StaticEnvironment::new(vars(&[
        ("BERGLAS_TEST_CONT_A", format!("berglas://{BUCKET}/missing")),
        ("BERGLAS_TEST_CONT_B", format!("sm://{PROJECT}/api-token")),
    ]));

    let report = import(
        &h.client,
        &Context::new(),
        &runtime,
        ImportOptions {
            continue_on_error: true,
        },
    )
    .await
    .unwrap();

    assert_eq!(report.replaced, vec!["BERGLAS_TEST_CONT_B"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "BERGLAS_TEST_CONT_A");
    assert_eq!(std::env::var("BERGLAS_TEST_CONT_B").unwrap(), "tok-123");
}

#[tokio::test]
async fn test_import_retries_transient_environment_failures() {
    let h = harness();
    seed(&h).await;
    let runtime = StaticEnvironment::new(vars(&[(
        "BERGLAS_TEST_RETRY_TOKEN",
        format!("sm://{PROJECT}/api-token"),
    )]))
    .with_failures([503, 502]);

    let report = import(&h.client, &Context::new(), &runtime, ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(report.replaced, vec!["BERGLAS_TEST_RETRY_TOKEN"]);
}

#[tokio::test]
async fn test_import_does_not_retry_client_errors() {
    let h = harness();
    let runtime = StaticEnvironment::new(vars(&[(
        "BERGLAS_TEST_FORBIDDEN",
        format!("sm://{PROJECT}/api-token"),
    )]))
    .with_failures([403]);

    let err = import(&h.client, &Context::new(), &runtime, ImportOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Api);

    // A retry would have reached resolution and failed with NotFound instead
    let again = import(&h.client, &Context::new(), &runtime, ImportOptions::default()).await;
    assert!(again.unwrap_err().is_not_found());
}
