use crate::{MockUpstream, describe, test_registry};
use depot::error::RegistryError;
use depot::models::{PackageSource, PermissionLevel, Requirements};
use depot::services::{BlobKey, BlobStore};

#[cfg(test)]
mod package_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_package_succeeds_exactly_once() {
        let registry = test_registry(MockUpstream::disabled());

        for name in ["phoenix", "phoenix_live_view", "a", "ecto2"] {
            let package = registry
                .create_package(name, "hexpm", describe("test"), false, PackageSource::Local)
                .unwrap();
            assert_eq!(package.name, name);
            assert_eq!(package.source, PackageSource::Local);
            assert_eq!(package.downloads, 0);

            match registry.create_package(name, "hexpm", describe("again"), false, PackageSource::Local) {
                Err(RegistryError::DuplicateName(dup)) => assert_eq!(dup, name),
                other => panic!("expected DuplicateName for {name}, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_create_package_rejects_bad_names() {
        let registry = test_registry(MockUpstream::disabled());

        let too_long = "x".repeat(101);
        for name in ["", "Phoenix", "9lives", "with-dash", "with space", too_long.as_str()] {
            assert!(
                matches!(
                    registry.create_package(name, "hexpm", describe(""), false, PackageSource::Local),
                    Err(RegistryError::InvalidInput(_))
                ),
                "name {name:?} should be rejected"
            );
        }

        assert!(matches!(
            registry.create_package("plug", "Bad Repo", describe(""), false, PackageSource::Local),
            Err(RegistryError::InvalidInput(_))
        ));
        // nothing was written
        assert!(registry.list_repositories().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_package_reads_local_record() {
        let registry = test_registry(MockUpstream::disabled());
        registry
            .create_package("plug", "hexpm", describe("Composable modules"), true, PackageSource::Local)
            .unwrap();

        let package = registry.get_package("plug").await.unwrap();
        assert_eq!(package.description(), Some("Composable modules"));
        assert!(package.private);
        assert_eq!(package.repository_name, "hexpm");
    }

    #[tokio::test]
    async fn test_update_package_meta() {
        let registry = test_registry(MockUpstream::disabled());
        let created = registry
            .create_package("plug", "hexpm", describe("old"), false, PackageSource::Local)
            .unwrap();

        let updated = registry
            .update_package_meta("plug", describe("new"))
            .unwrap();
        assert_eq!(updated.description(), Some("new"));
        assert!(updated.updated_at >= created.updated_at);
        assert_eq!(updated.created_at, created.created_at);

        assert!(matches!(
            registry.update_package_meta("missing", describe("x")),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cached_packages_are_read_only() {
        let registry = test_registry(MockUpstream::disabled());
        registry
            .create_package("jason", "hexpm", describe("JSON"), false, PackageSource::Cached)
            .unwrap();

        assert!(matches!(
            registry.update_package_meta("jason", describe("changed")),
            Err(RegistryError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_package_cascades() {
        let registry = test_registry(MockUpstream::disabled());
        registry
            .create_package("phoenix", "hexpm", describe("web"), false, PackageSource::Local)
            .unwrap();
        registry
            .create_package("plug", "hexpm", describe("plug"), false, PackageSource::Local)
            .unwrap();

        for version in ["1.6.0", "1.7.0"] {
            registry
                .create_release("phoenix", version, describe(""), Requirements::new(), b"tar")
                .await
                .unwrap();
        }
        registry
            .toggle_docs("phoenix", "1.7.0", true, Some(b"docs".as_slice()))
            .await
            .unwrap();
        registry.record_download("phoenix", "1.7.0").unwrap();
        registry
            .add_owner("phoenix", "chris", PermissionLevel::Admin)
            .unwrap();
        registry
            .add_owner("phoenix", "jose", PermissionLevel::Write)
            .unwrap();
        registry
            .create_release("plug", "1.14.0", describe(""), Requirements::new(), b"plug")
            .await
            .unwrap();
        registry.add_owner("plug", "jose", PermissionLevel::Admin).unwrap();

        registry.delete_package("phoenix").await.unwrap();

        assert!(matches!(
            registry.get_package("phoenix").await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            registry.get_release("phoenix", "1.7.0").await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(!registry.has_write_permission("phoenix", "chris").unwrap());

        let snapshot = registry.snapshot(PackageSource::Local).unwrap();
        assert!(snapshot.releases.iter().all(|r| r.package_name != "phoenix"));
        assert!(snapshot.owners.iter().all(|o| o.package_name != "phoenix"));

        for version in ["1.6.0", "1.7.0"] {
            assert!(!registry.blobs.exists(&BlobKey::package("phoenix", version)).await);
        }
        assert!(!registry.blobs.exists(&BlobKey::docs("phoenix", "1.7.0")).await);

        // the neighbour is untouched
        assert_eq!(registry.list_releases("plug").unwrap().len(), 1);
        assert!(registry.has_write_permission("plug", "jose").unwrap());
        assert!(registry.blobs.exists(&BlobKey::package("plug", "1.14.0")).await);

        assert!(matches!(
            registry.delete_package("phoenix").await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_deleted_name_can_be_reused() {
        let registry = test_registry(MockUpstream::disabled());
        registry
            .create_package("plug", "hexpm", describe("first"), false, PackageSource::Local)
            .unwrap();
        registry.delete_package("plug").await.unwrap();

        let again = registry
            .create_package("plug", "hexpm", describe("second"), false, PackageSource::Local)
            .unwrap();
        assert_eq!(again.description(), Some("second"));
    }
}
