#![cfg(test)]

pub mod content {
    use crate::model::{BinaryValue, ContentNode, ContentProperty, PropertyType};
    use crate::resolver::DEFAULT_REFERENCE_PROPERTY;
    use crate::store::ItemRef;
    use crate::store::VariantState;
    use crate::store::memory::MemoryRepository;

    /// Page with a title and one text block.
    pub fn page(name: &str, title: &str) -> ContentNode {
        ContentNode::new(name, "site:page")
            .with_property(ContentProperty::string("site:title", title))
            .with_child(
                ContentNode::new("body", "site:html")
                    .with_property(ContentProperty::string("site:content", format!("<p>{title}</p>"))),
            )
    }

    /// Mirror node pointing at `target` through the default reference property.
    pub fn link(name: &str, target: &str) -> ContentNode {
        ContentNode::new(name, "ferry:mirror")
            .with_property(ContentProperty::string(DEFAULT_REFERENCE_PROPERTY, target))
    }

    /// Asset carrying `size` bytes of inline binary data.
    pub fn asset(name: &str, size: usize) -> ContentNode {
        let data = ContentProperty::single(
            "ferry:data",
            PropertyType::Binary,
            BinaryValue::Inline(vec![7; size]),
        )
        .expect("binary property");
        ContentNode::new(name, "ferry:asset").with_property(data)
    }

    /// Items of [`populated_repository`].
    #[derive(Debug)]
    pub struct Seeded {
        pub logo: ItemRef,
        pub home: ItemRef,
        pub about: ItemRef,
        pub draft: ItemRef,
    }

    /// A small site: a logo asset, a published home page linking to the logo
    /// and to the about page, a published about page, and a draft-only page.
    pub fn populated_repository(repo: &MemoryRepository) -> Seeded {
        let logo = repo
            .insert_item("/content/assets/logo", asset("logo", 64), &[])
            .expect("insert logo");
        let about = repo
            .insert_item(
                "/content/documents/about",
                page("about", "About"),
                &[VariantState::Draft, VariantState::Published],
            )
            .expect("insert about");
        let home = repo
            .insert_item(
                "/content/documents/home",
                page("home", "Home")
                    .with_child(link("logo", &logo.id))
                    .with_child(link("about", &about.id)),
                &[VariantState::Draft, VariantState::Unpublished, VariantState::Published],
            )
            .expect("insert home");
        let draft = repo
            .insert_item(
                "/content/documents/news/upcoming",
                page("upcoming", "Upcoming"),
                &[VariantState::Draft],
            )
            .expect("insert draft");
        Seeded {
            logo,
            home,
            about,
            draft,
        }
    }
}

pub mod bundle {
    use crate::bundle::Bundle;

    /// Empty bundle in a fresh temp dir. Keep the guard alive for the test.
    pub async fn temp_bundle() -> (tempfile::TempDir, Bundle) {
        let dir = tempfile::tempdir().expect("temp dir");
        let bundle = Bundle::create(dir.path().join("bundle"))
            .await
            .expect("create bundle");
        (dir, bundle)
    }
}
