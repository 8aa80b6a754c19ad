use crate::{MockUpstream, TestRegistry, describe, test_registry};
use depot::error::RegistryError;
use depot::models::{
    PackageSource, Requirement, Requirements, RetirementReason, RetirementState,
};
use depot::services::{BlobKey, BlobStore};
use diesel::RunQueryDsl;
use std::time::Duration;

fn with_package(name: &str) -> TestRegistry {
    let registry = test_registry(MockUpstream::disabled());
    registry
        .create_package(name, "hexpm", describe("test package"), false, PackageSource::Local)
        .unwrap();
    registry
}

fn install_trigger(registry: &TestRegistry, sql: &str) {
    let mut conn = registry.store().get_connection().unwrap();
    diesel::sql_query(sql).execute(&mut *conn).unwrap();
}

#[cfg(test)]
mod release_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_then_get_round_trips() {
        let registry = with_package("phoenix");

        let mut meta = describe("Peace of mind from prototype to production");
        meta.insert("build_tools", serde_json::json!(["mix"]));
        meta.insert("elixir", "~> 1.11");
        let requirements = Requirements::new()
            .with("plug", Requirement::new("~> 1.14"))
            .with(
                "jason",
                Requirement {
                    requirement: "~> 1.0".to_string(),
                    optional: true,
                    app: Some("jason".to_string()),
                    repository: Some("hexpm".to_string()),
                },
            );

        let created = registry
            .create_release("phoenix", "1.7.0", meta.clone(), requirements.clone(), b"tarball")
            .await
            .unwrap();
        assert_eq!(created.state(), RetirementState::Active);
        assert!(!created.has_docs);

        let fetched = registry.get_release("phoenix", "1.7.0").await.unwrap();
        assert_eq!(fetched.meta, meta);
        assert_eq!(fetched.requirements, requirements);
        assert_eq!(fetched.id, created.id);

        assert_eq!(registry.get_tarball("phoenix", "1.7.0").await.unwrap(), b"tarball");
    }

    #[tokio::test]
    async fn test_republish_returns_latest_entry() {
        let registry = with_package("plug");

        let first = registry
            .create_release("plug", "1.14.0", describe("first"), Requirements::new(), b"one")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = registry
            .create_release(
                "plug",
                "1.14.0",
                describe("second"),
                Requirements::new().with("mime", Requirement::new("~> 2.0")),
                b"two",
            )
            .await
            .unwrap();
        assert!(second.updated_at > first.updated_at);

        let current = registry.get_release("plug", "1.14.0").await.unwrap();
        assert_eq!(current.meta.description(), Some("second"));
        assert_eq!(current.requirements.len(), 1);
        assert_eq!(current.updated_at, second.updated_at);
        assert_eq!(registry.list_releases("plug").unwrap().len(), 1);
        assert_eq!(registry.get_tarball("plug", "1.14.0").await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_release_requires_existing_package() {
        let registry = test_registry(MockUpstream::disabled());

        assert!(matches!(
            registry
                .create_release("ghost", "1.0.0", describe(""), Requirements::new(), b"tar")
                .await,
            Err(RegistryError::DependencyMissing(_))
        ));
        assert!(registry.blobs.is_empty());
    }

    #[tokio::test]
    async fn test_release_rejects_malformed_package_name() {
        let registry = test_registry(MockUpstream::disabled());

        for name in ["Plug", "9lives", "plug-cowboy", ""] {
            assert!(matches!(
                registry
                    .create_release(name, "1.0.0", describe(""), Requirements::new(), b"tar")
                    .await,
                Err(RegistryError::InvalidInput(_))
            ));
        }
        assert!(registry.blobs.is_empty());
    }

    #[tokio::test]
    async fn test_release_rejects_bad_version_before_writing() {
        let registry = with_package("plug");

        for version in ["1.0", "v1.0.0", "", "latest"] {
            assert!(matches!(
                registry
                    .create_release("plug", version, describe(""), Requirements::new(), b"tar")
                    .await,
                Err(RegistryError::InvalidInput(_))
            ));
        }
        assert!(matches!(
            registry
                .create_release("plug", "1.0.0", describe(""), Requirements::new(), b"")
                .await,
            Err(RegistryError::InvalidInput(_))
        ));
        assert!(registry.blobs.is_empty());
    }

    #[tokio::test]
    async fn test_failed_metadata_write_removes_uploaded_tarball() {
        let registry = with_package("ecto");
        install_trigger(
            &registry,
            "CREATE TRIGGER reject_release_insert BEFORE INSERT ON releases \
             BEGIN SELECT RAISE(ABORT, 'release writes disabled'); END",
        );

        let result = registry
            .create_release("ecto", "3.10.0", describe(""), Requirements::new(), b"tar")
            .await;

        assert!(matches!(result, Err(RegistryError::StorageFailure(_))));
        assert!(!registry.blobs.exists(&BlobKey::package("ecto", "3.10.0")).await);
        assert!(matches!(
            registry.get_release("ecto", "3.10.0").await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_republish_restores_previous_tarball() {
        let registry = with_package("ecto");
        registry
            .create_release("ecto", "3.10.0", describe("v1"), Requirements::new(), b"first")
            .await
            .unwrap();

        install_trigger(
            &registry,
            "CREATE TRIGGER reject_release_insert BEFORE INSERT ON releases \
             BEGIN SELECT RAISE(ABORT, 'release writes disabled'); END",
        );
        install_trigger(
            &registry,
            "CREATE TRIGGER reject_release_update BEFORE UPDATE ON releases \
             BEGIN SELECT RAISE(ABORT, 'release writes disabled'); END",
        );

        let result = registry
            .create_release("ecto", "3.10.0", describe("v2"), Requirements::new(), b"second")
            .await;
        assert!(matches!(result, Err(RegistryError::StorageFailure(_))));

        assert_eq!(registry.get_tarball("ecto", "3.10.0").await.unwrap(), b"first");
        let current = registry.get_release("ecto", "3.10.0").await.unwrap();
        assert_eq!(current.meta.description(), Some("v1"));
    }

    #[tokio::test]
    async fn test_retire_is_idempotent() {
        let registry = with_package("plug");
        registry
            .create_release("plug", "1.0.0", describe(""), Requirements::new(), b"tar")
            .await
            .unwrap();

        let first = registry
            .retire("plug", "1.0.0", RetirementReason::Security, Some("CVE-2024-0001".into()))
            .unwrap();
        let second = registry
            .retire("plug", "1.0.0", RetirementReason::Security, Some("CVE-2024-0001".into()))
            .unwrap();

        assert_eq!(second.state(), RetirementState::Retired);
        assert_eq!(first.retirement(), second.retirement());
        assert_eq!(
            second.retirement_message.as_deref(),
            Some("CVE-2024-0001")
        );

        let current = registry.get_release("plug", "1.0.0").await.unwrap();
        assert!(current.is_retired());
        assert_eq!(current.retirement_reason, Some(RetirementReason::Security));
    }

    #[tokio::test]
    async fn test_retirement_toggles_both_ways() {
        let registry = with_package("plug");
        registry
            .create_release("plug", "1.0.0", describe(""), Requirements::new(), b"tar")
            .await
            .unwrap();

        registry
            .retire("plug", "1.0.0", RetirementReason::Deprecated, None)
            .unwrap();
        let renamed = registry
            .retire("plug", "1.0.0", RetirementReason::Renamed, Some("use plug_cowboy".into()))
            .unwrap();
        assert_eq!(renamed.retirement_reason, Some(RetirementReason::Renamed));

        let active = registry.unretire("plug", "1.0.0").unwrap();
        assert_eq!(active.state(), RetirementState::Active);
        assert!(active.retirement_message.is_none());
        // unretiring an active release is fine too
        assert!(!registry.unretire("plug", "1.0.0").unwrap().is_retired());

        assert!(matches!(
            registry.retire("plug", "9.9.9", RetirementReason::Other, None),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_toggle_docs() {
        let registry = with_package("phoenix");
        registry
            .create_release("phoenix", "1.7.0", describe(""), Requirements::new(), b"tar")
            .await
            .unwrap();

        assert!(matches!(
            registry.toggle_docs("phoenix", "1.7.0", true, None).await,
            Err(RegistryError::InvalidInput(_))
        ));
        assert!(matches!(
            registry.get_docs("phoenix", "1.7.0").await,
            Err(RegistryError::NotFound(_))
        ));

        let enabled = registry
            .toggle_docs("phoenix", "1.7.0", true, Some(b"docs".as_slice()))
            .await
            .unwrap();
        assert!(enabled.has_docs);
        assert_eq!(registry.get_docs("phoenix", "1.7.0").await.unwrap(), b"docs");

        let disabled = registry
            .toggle_docs("phoenix", "1.7.0", false, None)
            .await
            .unwrap();
        assert!(!disabled.has_docs);
        assert!(!registry.blobs.exists(&BlobKey::docs("phoenix", "1.7.0")).await);

        assert!(matches!(
            registry.toggle_docs("phoenix", "2.0.0", true, Some(b"docs".as_slice())).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_docs_toggle_removes_uploaded_docs() {
        let registry = with_package("phoenix");
        registry
            .create_release("phoenix", "1.7.0", describe(""), Requirements::new(), b"tar")
            .await
            .unwrap();
        install_trigger(
            &registry,
            "CREATE TRIGGER reject_release_update BEFORE UPDATE ON releases \
             BEGIN SELECT RAISE(ABORT, 'release updates disabled'); END",
        );

        let result = registry
            .toggle_docs("phoenix", "1.7.0", true, Some(b"docs".as_slice()))
            .await;

        assert!(matches!(result, Err(RegistryError::StorageFailure(_))));
        assert!(!registry.blobs.exists(&BlobKey::docs("phoenix", "1.7.0")).await);
        assert!(registry.blobs.exists(&BlobKey::package("phoenix", "1.7.0")).await);
    }

    #[tokio::test]
    async fn test_record_download_counts_release_and_package() {
        let registry = with_package("jason");
        registry
            .create_release("jason", "1.4.0", describe(""), Requirements::new(), b"tar")
            .await
            .unwrap();

        for _ in 0..3 {
            registry.record_download("jason", "1.4.0").unwrap();
        }

        assert_eq!(registry.get_release("jason", "1.4.0").await.unwrap().downloads, 3);
        assert_eq!(registry.get_package("jason").await.unwrap().downloads, 3);
        assert!(matches!(
            registry.record_download("jason", "0.0.1"),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_releases_newest_first() {
        let registry = with_package("ecto");
        for version in ["3.8.0", "3.9.0", "3.10.0"] {
            registry
                .create_release("ecto", version, describe(""), Requirements::new(), b"tar")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let versions: Vec<String> = registry
            .list_releases("ecto")
            .unwrap()
            .into_iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(versions, vec!["3.10.0", "3.9.0", "3.8.0"]);

        assert!(matches!(
            registry.list_releases("missing"),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_version_of_local_package_is_not_found() {
        let registry = with_package("plug");
        assert!(matches!(
            registry.get_release("plug", "1.0.0").await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            registry.get_tarball("plug", "1.0.0").await,
            Err(RegistryError::NotFound(_))
        ));
    }
}
