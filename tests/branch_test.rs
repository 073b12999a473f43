// Branch materialization: depth/children bounds, truncation flags and
// stale-path reporting.

use anyhow::Result;
use pretty_assertions::assert_eq;

mod common;
use common::{el, FakeDocument, FakeNode};

use domscope::materializer;
use domscope::types::{BranchFetch, DomPath};

/// html > body > ul with five li children, each holding a link
fn list_page() -> FakeNode {
    let mut list = el("ul").id("results");
    for i in 0..5 {
        list = list.child(
            el("li")
                .class("result")
                .child(el("a").text(&format!("result {}", i))),
        );
    }
    el("html").child(el("body").child(list))
}

#[tokio::test]
async fn test_max_children_truncates_with_flag() -> Result<()> {
    let doc = FakeDocument::new(list_page());
    let list_path = DomPath::new(vec![0, 0]);

    let fetched = materializer::fetch_branch(&doc, &list_path, 1, 2).await?;
    match fetched {
        BranchFetch::Delivered { root } => {
            assert_eq!(root.tag, "ul");
            // Five children exist; exactly two descriptors come back plus
            // the truncation flag
            assert_eq!(root.children.len(), 2);
            assert!(root.truncated);
            assert_eq!(root.children[0].dom_path, list_path.child(0));
            assert_eq!(root.children[1].dom_path, list_path.child(1));
        }
        BranchFetch::Stale => panic!("unexpected stale fetch"),
    }
    Ok(())
}

#[tokio::test]
async fn test_max_depth_zero_returns_only_the_root() -> Result<()> {
    let doc = FakeDocument::new(list_page());
    let list_path = DomPath::new(vec![0, 0]);

    let fetched = materializer::fetch_branch(&doc, &list_path, 0, 10).await?;
    match fetched {
        BranchFetch::Delivered { root } => {
            assert!(root.children.is_empty());
            // Children exist below the cut, so the node reports truncation
            assert!(root.truncated);
        }
        BranchFetch::Stale => panic!("unexpected stale fetch"),
    }
    Ok(())
}

#[tokio::test]
async fn test_depth_two_includes_grandchildren() -> Result<()> {
    let doc = FakeDocument::new(list_page());
    let list_path = DomPath::new(vec![0, 0]);

    let fetched = materializer::fetch_branch(&doc, &list_path, 2, 10).await?;
    match fetched {
        BranchFetch::Delivered { root } => {
            assert_eq!(root.children.len(), 5);
            assert!(!root.truncated);
            let first_item = &root.children[0];
            assert_eq!(first_item.tag, "li");
            assert_eq!(first_item.children.len(), 1);
            assert_eq!(first_item.children[0].tag, "a");
            assert_eq!(
                first_item.children[0].attributes.get("text").map(String::as_str),
                Some("result 0")
            );
        }
        BranchFetch::Stale => panic!("unexpected stale fetch"),
    }
    Ok(())
}

#[tokio::test]
async fn test_descriptors_carry_identifying_attributes() -> Result<()> {
    let doc = FakeDocument::new(list_page());

    let fetched = materializer::fetch_branch(&doc, &DomPath::new(vec![0, 0]), 1, 10).await?;
    match fetched {
        BranchFetch::Delivered { root } => {
            assert_eq!(root.attributes.get("id").map(String::as_str), Some("results"));
            assert_eq!(
                root.children[0].attributes.get("class").map(String::as_str),
                Some("result")
            );
        }
        BranchFetch::Stale => panic!("unexpected stale fetch"),
    }
    Ok(())
}

#[tokio::test]
async fn test_stale_path_after_mutation() -> Result<()> {
    let doc = FakeDocument::new(list_page());
    // Path captured against the old render
    let captured = DomPath::new(vec![0, 0, 4]);

    // The page re-renders with a smaller list; the captured path is gone
    let mut smaller = el("ul").id("results");
    smaller = smaller.child(el("li").class("result"));
    doc.navigate(el("html").child(el("body").child(smaller)));

    let fetched = materializer::fetch_branch(&doc, &captured, 1, 10).await?;
    assert_eq!(fetched, BranchFetch::Stale);
    Ok(())
}

#[tokio::test]
async fn test_stale_is_not_an_error_for_missing_root() -> Result<()> {
    let doc = FakeDocument::new(list_page());

    // A path that never existed in this render
    let fetched = materializer::fetch_branch(&doc, &DomPath::new(vec![9, 9]), 1, 10).await?;
    assert_eq!(fetched, BranchFetch::Stale);
    Ok(())
}
