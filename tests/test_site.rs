use std::fs;

use wicket::config::Config;
use wicket::http::request::{Method, RequestBuilder};
use wicket::site::{DirectoryRoute, Site};

fn get(path: &str) -> wicket::http::request::Request {
    RequestBuilder::new()
        .method(Method::GET)
        .target(path)
        .version("HTTP/1.1")
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_directory_without_slash_redirects() {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir(root.path().join("docs")).unwrap();
    let site = Site::new("/", root.path());

    assert_eq!(
        site.route_directory(&get("/docs")).await,
        DirectoryRoute::Redirect("/docs/".to_string())
    );
}

#[tokio::test]
async fn test_redirect_location_is_encoded() {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir(root.path().join("my docs")).unwrap();
    let site = Site::new("/", root.path());

    assert_eq!(
        site.route_directory(&get("/my%20docs")).await,
        DirectoryRoute::Redirect("/my%20docs/".to_string())
    );
}

#[tokio::test]
async fn test_default_document_order() {
    let root = tempfile::tempdir().unwrap();
    let docs = root.path().join("docs");
    fs::create_dir(&docs).unwrap();
    fs::write(docs.join("index.html"), "index").unwrap();
    fs::write(docs.join("default.html"), "default").unwrap();
    let site = Site::new("/", root.path());

    assert_eq!(
        site.route_directory(&get("/docs/")).await,
        DirectoryRoute::DefaultDocument("/docs/default.html".to_string())
    );
}

#[tokio::test]
async fn test_directory_without_default_document() {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir(root.path().join("empty")).unwrap();
    let site = Site::new("/", root.path());

    assert_eq!(
        site.route_directory(&get("/empty/")).await,
        DirectoryRoute::Directory(root.path().join("empty"))
    );
}

#[tokio::test]
async fn test_files_and_missing_paths_are_not_directories() {
    let root = tempfile::tempdir().unwrap();
    fs::write(root.path().join("a.htm"), "a").unwrap();
    let site = Site::new("/", root.path());

    assert_eq!(
        site.route_directory(&get("/a.htm")).await,
        DirectoryRoute::NotDirectory
    );
    assert_eq!(
        site.route_directory(&get("/missing/")).await,
        DirectoryRoute::NotDirectory
    );
}

#[tokio::test]
async fn test_virtual_path_mapping() {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir(root.path().join("docs")).unwrap();
    let site = Site::new("/app", root.path());

    assert_eq!(site.map_path("/app"), root.path());
    assert_eq!(
        site.route_directory(&get("/app/docs")).await,
        DirectoryRoute::Redirect("/app/docs/".to_string())
    );
}

#[test]
fn test_site_from_config() {
    let cfg = Config::from_yaml_str(
        "server:\n  virtual_path: /shop\nsite:\n  physical_path: ./public\n  require_authentication: true\n",
    )
    .unwrap();
    let site = Site::from_config(&cfg).unwrap();

    assert_eq!(site.virtual_path(), "/shop");
    assert!(site.physical_root().is_absolute());
    assert!(site.physical_root().ends_with("public"));
    assert!(site.requires_authentication());
    assert!(site.directory_listing());
}
