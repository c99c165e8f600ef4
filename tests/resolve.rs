mod support;

use support::{fixture, fixture_with_config, seed_graph};
use tagstore::RegistryConfig;

const ID_A: &str = "sha256:aaaa00112233445566778899aabbccdd";
const ID_B: &str = "sha256:bbbb00112233445566778899aabbccdd";

#[tokio::test]
async fn exact_match_beats_canonical_match() {
    let f = fixture();
    seed_graph(&f.graph, ID_A).await;
    seed_graph(&f.graph, ID_B).await;

    // "busybox" stored unqualified, and "docker.io/busybox" canonically
    f.store.tag("busybox", "latest", ID_A, false, true).unwrap();
    f.store
        .tag("docker.io/busybox", "latest", ID_B, false, false)
        .unwrap();

    let list = f.store.repository_list("busybox").unwrap();
    let names: Vec<&str> = list.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["busybox", "docker.io/busybox"]);

    // Get returns the exact match
    let repo = f.store.get("busybox").unwrap().unwrap();
    assert_eq!(repo.get("latest"), Some(ID_A));
}

#[tokio::test]
async fn search_list_rescues_other_registries() {
    let config = RegistryConfig::new().add_registry("r1");
    let f = fixture_with_config(config);
    seed_graph(&f.graph, ID_A).await;

    // only the r1 copy exists locally
    f.store
        .tag("r1/library/hello-world", "latest", ID_A, false, false)
        .unwrap();

    assert_eq!(
        f.store.best_candidate("library/hello-world").unwrap(),
        Some("r1/library/hello-world".to_owned())
    );
}

#[tokio::test]
async fn already_qualified_foreign_names_still_resolve() {
    let f = fixture();
    seed_graph(&f.graph, ID_A).await;

    // a repository pulled from a registry that is not configured at all
    f.store
        .tag("other.example/team/img", "latest", ID_A, false, false)
        .unwrap();

    assert_eq!(
        f.store.best_candidate("team/img").unwrap(),
        Some("other.example/team/img".to_owned())
    );
}

#[tokio::test]
async fn growing_the_search_list_never_changes_a_resolution() {
    let f = fixture();
    seed_graph(&f.graph, ID_A).await;
    f.store.tag("img", "latest", ID_A, false, false).unwrap();

    let before = f.store.best_candidate("img").unwrap();

    // reopen the same file with a longer search list
    let grown = tagstore::TagStore::new(
        f.store.path(),
        RegistryConfig::new().add_registry("r1").add_registry("r2"),
        f.graph.clone() as std::sync::Arc<dyn tagstore::ImageGraph>,
    )
    .unwrap();
    assert_eq!(grown.best_candidate("img").unwrap(), before);
}

#[tokio::test]
async fn qualified_lookups_have_a_single_candidate() {
    let f = fixture();
    seed_graph(&f.graph, ID_A).await;
    f.store
        .tag("myhost:5000/img", "latest", ID_A, false, false)
        .unwrap();
    f.store.tag("img", "latest", ID_A, false, true).unwrap();

    // a fully qualified name never falls back to the search list
    let list = f.store.repository_list("myhost:5000/img").unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].0, "myhost:5000/img");
}
