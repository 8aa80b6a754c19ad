use crate::{MockUpstream, TestRegistry, describe, test_registry};
use depot::models::{ListQuery, PackageSort, PackageSource, Requirements};
use std::collections::HashSet;

fn registry_with_packages(count: usize) -> TestRegistry {
    let registry = test_registry(MockUpstream::disabled());
    for i in 0..count {
        registry
            .create_package(
                &format!("pkg_{i:02}"),
                "hexpm",
                describe(&format!("Package number {i}")),
                false,
                PackageSource::Local,
            )
            .unwrap();
    }
    registry
}

fn names(page: &depot::models::PackagePage) -> Vec<String> {
    page.packages.iter().map(|p| p.name.clone()).collect()
}

#[cfg(test)]
mod listing_tests {
    use super::*;

    #[tokio::test]
    async fn test_pagination_partitions_the_listing() {
        let registry = registry_with_packages(25);

        let mut pages = Vec::new();
        for page in 1..=3 {
            let query = ListQuery {
                page,
                per_page: 10,
                ..ListQuery::default()
            };
            pages.push(registry.list_packages(&query).await.unwrap());
        }

        assert_eq!(pages[0].packages.len(), 10);
        assert_eq!(pages[1].packages.len(), 10);
        assert_eq!(pages[2].packages.len(), 5);
        assert!(pages.iter().all(|p| p.total == 25));

        let page1: HashSet<String> = names(&pages[0]).into_iter().collect();
        let page2: HashSet<String> = names(&pages[1]).into_iter().collect();
        let page3: HashSet<String> = names(&pages[2]).into_iter().collect();
        assert!(page1.is_disjoint(&page2));
        assert!(page2.is_disjoint(&page3));

        let union: Vec<String> = pages.iter().flat_map(names).collect();
        let everything = registry
            .list_packages(&ListQuery {
                per_page: 100,
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(union, names(&everything));
        assert_eq!(union.len(), 25);
        assert_eq!(union.first().map(String::as_str), Some("pkg_00"));
    }

    #[tokio::test]
    async fn test_pagination_clamps_parameters() {
        let registry = registry_with_packages(3);

        let page = registry
            .list_packages(&ListQuery {
                page: 0,
                per_page: 10_000,
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.per_page, registry.config().max_per_page);
        assert_eq!(page.packages.len(), 3);

        let past_the_end = registry
            .list_packages(&ListQuery {
                page: 9,
                per_page: 2,
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert!(past_the_end.packages.is_empty());
        assert_eq!(past_the_end.total, 3);
    }

    #[tokio::test]
    async fn test_search_matches_name_and_description_case_insensitively() {
        let registry = test_registry(MockUpstream::disabled());
        registry
            .create_package("phoenix", "hexpm", describe("Web Framework"), false, PackageSource::Local)
            .unwrap();
        registry
            .create_package("plug", "hexpm", describe("Composable web modules"), false, PackageSource::Local)
            .unwrap();
        registry
            .create_package("jason", "hexpm", describe("JSON parser"), false, PackageSource::Local)
            .unwrap();

        let web = registry
            .list_packages(&ListQuery {
                search: Some("WEB".to_string()),
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(names(&web), vec!["phoenix", "plug"]);

        let by_name = registry
            .list_packages(&ListQuery {
                search: Some("Jas".to_string()),
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(names(&by_name), vec!["jason"]);

        let letter = registry
            .list_packages(&ListQuery {
                letter: Some('P'),
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(names(&letter), vec!["phoenix", "plug"]);

        let none = registry
            .list_packages(&ListQuery {
                search: Some("database".to_string()),
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert!(none.packages.is_empty());
        assert_eq!(none.total, 0);
    }

    #[tokio::test]
    async fn test_download_sorts() {
        let registry = test_registry(MockUpstream::disabled());
        for (name, downloads) in [("ecto", 2), ("jason", 5), ("plug", 2)] {
            registry
                .create_package(name, "hexpm", describe(""), false, PackageSource::Local)
                .unwrap();
            registry
                .create_release(name, "1.0.0", describe(""), Requirements::new(), b"tar")
                .await
                .unwrap();
            for _ in 0..downloads {
                registry.record_download(name, "1.0.0").unwrap();
            }
        }

        for sort in [PackageSort::TotalDownloads, PackageSort::RecentDownloads] {
            let page = registry
                .list_packages(&ListQuery {
                    sort,
                    ..ListQuery::default()
                })
                .await
                .unwrap();
            // ties fall back to name ascending
            assert_eq!(names(&page), vec!["jason", "ecto", "plug"], "sort {sort:?}");
        }
    }

    #[tokio::test]
    async fn test_recently_updated_and_created_sorts() {
        let registry = test_registry(MockUpstream::disabled());
        for name in ["ecto", "jason", "plug"] {
            registry
                .create_package(name, "hexpm", describe(""), false, PackageSource::Local)
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        registry
            .update_package_meta("ecto", describe("touched"))
            .unwrap();

        let updated = registry
            .list_packages(&ListQuery {
                sort: PackageSort::RecentlyUpdated,
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(names(&updated), vec!["ecto", "plug", "jason"]);

        let created = registry
            .list_packages(&ListQuery {
                sort: PackageSort::RecentlyCreated,
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(names(&created), vec!["plug", "jason", "ecto"]);
    }

    #[tokio::test]
    async fn test_empty_search_falls_back_to_upstream() {
        let upstream = MockUpstream::enabled()
            .with_package("phoenix", "Peace of mind", 120_000_000)
            .with_package("phoenix_html", "HTML helpers", 90_000_000)
            .with_package("plug", "Composable modules", 150_000_000);
        let registry = test_registry(upstream);

        let page = registry
            .list_packages(&ListQuery {
                search: Some("phoenix".to_string()),
                upstream_fallback: true,
                ..ListQuery::default()
            })
            .await
            .unwrap();

        assert_eq!(names(&page), vec!["phoenix", "phoenix_html"]);
        assert_eq!(page.total, 2);
        assert!(page.packages.iter().all(|p| p.source == PackageSource::Cached));
        assert!(page.packages.iter().all(|p| p.id == 0));
        assert_eq!(page.packages[0].downloads, 120_000_000);
        assert_eq!(registry.upstream.calls(), 1);

        // nothing was persisted
        let local = registry
            .list_packages(&ListQuery::default())
            .await
            .unwrap();
        assert!(local.packages.is_empty());
    }

    #[tokio::test]
    async fn test_no_upstream_fallback_without_search_term_or_flag() {
        let upstream = MockUpstream::enabled().with_package("phoenix", "Peace of mind", 1);
        let registry = test_registry(upstream);

        for query in [
            ListQuery {
                upstream_fallback: true,
                ..ListQuery::default()
            },
            ListQuery {
                search: Some("   ".to_string()),
                upstream_fallback: true,
                ..ListQuery::default()
            },
            ListQuery {
                search: Some("phoenix".to_string()),
                upstream_fallback: false,
                ..ListQuery::default()
            },
        ] {
            let page = registry.list_packages(&query).await.unwrap();
            assert!(page.packages.is_empty());
        }
        assert_eq!(registry.upstream.calls(), 0);
    }

    #[tokio::test]
    async fn test_local_hits_suppress_upstream_search() {
        let upstream = MockUpstream::enabled().with_package("plug_cowboy", "Cowboy adapter", 1);
        let registry = test_registry(upstream);
        registry
            .create_package("plug", "hexpm", describe(""), false, PackageSource::Local)
            .unwrap();

        let page = registry
            .list_packages(&ListQuery {
                search: Some("plug".to_string()),
                upstream_fallback: true,
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(names(&page), vec!["plug"]);
        assert_eq!(registry.upstream.calls(), 0);
    }

    #[tokio::test]
    async fn test_upstream_fallback_honours_letter_filter() {
        let upstream = MockUpstream::enabled()
            .with_package("phoenix", "Peace of mind", 120_000_000)
            .with_package("phoenix_html", "HTML helpers", 90_000_000)
            .with_package("live_phoenix", "Live views", 1_000);
        let registry = test_registry(upstream);

        let unfiltered = registry
            .list_packages(&ListQuery {
                search: Some("phoenix".to_string()),
                upstream_fallback: true,
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(unfiltered.total, 3);

        let page = registry
            .list_packages(&ListQuery {
                search: Some("phoenix".to_string()),
                letter: Some('L'),
                upstream_fallback: true,
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(names(&page), vec!["live_phoenix"]);
        assert_eq!(page.total, 1);
        assert_eq!(registry.upstream.calls(), 2);
    }
}
