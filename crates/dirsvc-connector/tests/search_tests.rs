//! Search, fetch and attribute decoding against the in-memory directory.

mod common;

use chrono::{Datelike, TimeZone, Utc};
use common::{connection, MemoryDirectory, ROOT, USERS};
use dirsvc_connector::large_integer::max_timestamp;
use dirsvc_connector::prelude::*;

fn operations(directory: &MemoryDirectory) -> DirectoryOperations<MemoryDirectory> {
    common::init_tracing();
    DirectoryOperations::new(directory.clone(), connection()).unwrap()
}

#[tokio::test]
async fn test_search_without_projection_returns_all_attributes() {
    let directory = MemoryDirectory::seeded();
    let ops = operations(&directory);

    let output = ops
        .search(&SearchSpecification::new(USERS, "(objectClass=user)"))
        .await
        .unwrap();

    assert!(output.operation_successful);
    assert_eq!(output.entries.len(), 2);
    for record in &output.entries {
        assert!(record.attributes.has("cn"));
        assert!(record.attributes.has("userAccountControl"));
        assert!(record.attributes.has("accountExpires"));
    }
}

#[tokio::test]
async fn test_search_with_projection_returns_only_requested_attributes() {
    let directory = MemoryDirectory::seeded();
    let ops = operations(&directory);

    let spec = SearchSpecification::new(USERS, "(objectClass=user)")
        .with_properties(["cn"])
        .with_page_size(1);
    let output = ops.search(&spec).await.unwrap();

    assert_eq!(output.entries.len(), 2);
    for record in &output.entries {
        let names: Vec<&str> = record.attributes.names().collect();
        assert_eq!(names, vec!["cn"]);
        assert!(record.path.starts_with("ldap://dc01.test.net:389/CN="));
        assert!(record.path.ends_with(&record.dn));
    }
}

#[tokio::test]
async fn test_search_passes_page_size_to_backend() {
    let directory = MemoryDirectory::seeded();
    let ops = operations(&directory);

    let spec = SearchSpecification::new(USERS, "(objectClass=user)").with_page_size(250);
    let output = ops.search(&spec).await.unwrap();

    assert_eq!(output.entries.len(), 2);
    assert_eq!(directory.page_sizes(), vec![250]);
}

#[tokio::test]
async fn test_default_search_and_fetch_are_unpaged() {
    let directory = MemoryDirectory::seeded();
    let ops = operations(&directory);

    let spec = SearchSpecification::new(USERS, "(objectClass=user)");
    assert_eq!(spec.page_size, 0);
    let searched = ops.search(&spec).await.unwrap();
    let fetched = ops.fetch(USERS, "(objectClass=user)").await.unwrap();

    assert_eq!(searched.entries.len(), fetched.entries.len());
    assert_eq!(directory.page_sizes(), vec![0, 0]);
}

#[tokio::test]
async fn test_search_zero_matches_is_empty() {
    let directory = MemoryDirectory::seeded();
    let ops = operations(&directory);

    let output = ops
        .search(&SearchSpecification::new("", "(sn=Nobody)"))
        .await
        .unwrap();

    assert!(output.operation_successful);
    assert!(output.entries.is_empty());
}

#[tokio::test]
async fn test_search_substring_filter() {
    let directory = MemoryDirectory::seeded();
    let ops = operations(&directory);

    let output = ops
        .search(&SearchSpecification::new(ROOT, "(&(objectClass=user)(cn=J*Doe))"))
        .await
        .unwrap();

    assert_eq!(output.entries.len(), 1);
    assert_eq!(output.entries[0].dn, format!("CN=Jane Doe,{USERS}"));
}

#[tokio::test]
async fn test_malformed_filter_names_filter_and_root() {
    let directory = MemoryDirectory::seeded();
    let ops = operations(&directory);

    let err = ops
        .search(&SearchSpecification::new(USERS, "(cn=Jane"))
        .await
        .unwrap_err();

    match err {
        DirectoryError::SearchFailed { filter, root, .. } => {
            assert_eq!(filter, "(cn=Jane");
            assert_eq!(root, USERS);
        }
        other => panic!("expected SearchFailed, got {other}"),
    }
    assert_eq!(directory.closed(), 1);
}

#[tokio::test]
async fn test_unreachable_root_names_root() {
    let directory = MemoryDirectory::seeded();
    let ops = operations(&directory);

    let err = ops
        .fetch("OU=Gone,DC=test,DC=net", "(cn=*)")
        .await
        .unwrap_err();

    assert!(err.to_string().contains("OU=Gone,DC=test,DC=net"));
    assert!(matches!(err, DirectoryError::SearchFailed { .. }));
}

#[tokio::test]
async fn test_never_expiring_account_decodes_to_max_timestamp() {
    let directory = MemoryDirectory::seeded();
    let ops = operations(&directory);

    let output = ops.fetch(USERS, "(cn=Jane Doe)").await.unwrap();
    let entry = &output.entries[0];

    assert_eq!(
        entry.attributes.get("accountExpires"),
        Some(&AttributeValue::LargeInteger(LargeInteger::new(0x7FFF_FFFF, -1)))
    );
    assert_eq!(
        entry.property_large_integer("accountExpires").unwrap(),
        OneOrMany::One(i64::MAX)
    );
    assert_eq!(entry.account_expires().unwrap(), max_timestamp());
}

#[tokio::test]
async fn test_timestamp_decodes_filetime() {
    let directory = MemoryDirectory::seeded();
    // 2024-01-01T00:00:00Z
    directory.set_attribute(&format!("CN=Jane Doe,{USERS}"), "pwdLastSet", &["133485408000000000"]);
    let ops = operations(&directory);

    let output = ops.fetch(USERS, "(cn=Jane Doe)").await.unwrap();
    let stamp = output.entries[0]
        .property_timestamp("pwdLastSet")
        .unwrap()
        .single()
        .unwrap();

    assert_eq!(stamp, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    assert_eq!(stamp.year(), 2024);
}

#[tokio::test]
async fn test_strict_and_lenient_reads_of_absent_attribute() {
    let directory = MemoryDirectory::seeded();
    let ops = operations(&directory);

    let output = ops.fetch(USERS, "(cn=John Smith)").await.unwrap();
    let entry = &output.entries[0];

    assert!(matches!(
        entry.property_large_integer("lockoutTime"),
        Err(DirectoryError::MissingAttribute { ref attribute }) if attribute == "lockoutTime"
    ));
    assert_eq!(entry.first_string("lockoutTime"), None);
    assert!(entry.strings("lockoutTime").is_empty());
    assert!(entry.property("lockoutTime").is_empty());
}

#[tokio::test]
async fn test_timestamp_of_text_attribute_is_non_numeric() {
    let directory = MemoryDirectory::seeded();
    let ops = operations(&directory);

    let output = ops.fetch(USERS, "(cn=John Smith)").await.unwrap();
    let err = output.entries[0].property_timestamp("cn").unwrap_err();

    match err {
        DirectoryError::NonNumericAttribute { attribute, detail } => {
            assert_eq!(attribute, "cn");
            assert!(detail.contains("only numeric attributes"));
        }
        other => panic!("expected NonNumericAttribute, got {other}"),
    }
}

#[tokio::test]
async fn test_multi_valued_attribute_reads_as_sequence() {
    let directory = MemoryDirectory::seeded();
    let ops = operations(&directory);

    let output = ops.fetch(USERS, "(cn=Jane Doe)").await.unwrap();
    let entry = &output.entries[0];

    assert_eq!(entry.strings("objectClass"), vec!["top", "person", "user"]);
    assert_eq!(entry.property("objectClass").len(), 3);
    assert_eq!(entry.property("cn").len(), 1);
    assert_eq!(entry.first_string("objectClass").as_deref(), Some("top"));
}

#[tokio::test]
async fn test_fetch_binds_entries_for_mutation() {
    let directory = MemoryDirectory::seeded();
    let ops = operations(&directory);

    let session = ops.open_session().await.unwrap();
    let result = async {
        let mut entries = SearchEngine::new(&session)
            .fetch_by_filter(USERS, "(objectClass=user)")
            .await?;
        assert_eq!(entries.len(), 2);
        for entry in &mut entries {
            entry.set_attribute("department", "R&D".into(), ApplySemantics::Update)?;
            entry.commit().await?;
        }
        Ok::<_, DirectoryError>(())
    }
    .await;
    session.finish(result).await.unwrap();

    assert_eq!(
        directory.attribute(&format!("CN=John Smith,{USERS}"), "department"),
        Some(vec!["R&D".to_string()])
    );
    assert_eq!(directory.closed(), 1);
}
