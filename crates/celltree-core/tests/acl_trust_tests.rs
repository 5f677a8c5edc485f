//! ACL translation between role hrefs and ids, and trans-cell role
//! resolution feeding access checks.

mod common;

use celltree_core::acl::{Ace, Acl, Principal, Privilege};
use celltree_core::auth::{AccessContext, TransCellToken};
use celltree_core::destination::load_node;
use celltree_core::error::BadRequestReason;
use celltree_core::store::DocType;
use celltree_core::DavError;
use common::{BOX, CELL, TestEngine};

fn ace(principal: Principal, privileges: &[&str]) -> Ace {
    Ace {
        principal,
        privileges: privileges.iter().map(|p| (*p).to_string()).collect(),
    }
}

fn href(h: &str) -> Principal {
    Principal::Href(h.to_string())
}

fn bad_request_reason(result: Result<(), DavError>) -> BadRequestReason {
    match result {
        Err(DavError::BadRequest { reason, .. }) => reason,
        other => panic!("expected BadRequest, got {other:?}"),
    }
}

#[tokio::test]
async fn test_acl_round_trip_drops_deleted_roles() {
    let t = TestEngine::new().await;
    t.mkcol("docs").await.unwrap();
    let cell = t.engine.cell(CELL).await.unwrap();
    let box1 = t.engine.box_of(&cell, BOX).await.unwrap();
    let box2 = t.engine.create_box(CELL, "box2", None).await.unwrap();
    let control = t.engine.control();
    control.create_role(&cell.id, Some(&box1.id), "editor").await.unwrap();
    let admin = control.create_role(&cell.id, None, "admin").await.unwrap();
    control.create_role(&cell.id, Some(&box2.id), "guest").await.unwrap();

    let mut docs = t.open("docs").await;
    docs.set_acl(&Acl {
        base: None,
        require_schema_authz: Some("public".into()),
        aces: vec![
            ace(href("editor"), &["write"]),
            ace(href("../__/admin"), &["read", "write-acl"]),
            ace(href("https://unit.example/alice/__role/box2/guest"), &["read-content"]),
            ace(Principal::All, &["read"]),
        ],
    })
    .await
    .unwrap();

    let served = docs.acl().await.unwrap();
    assert_eq!(served.base.as_deref(), Some("https://unit.example/alice/__role/box1/"));
    assert_eq!(served.require_schema_authz.as_deref(), Some("public"));
    let principals: Vec<&Principal> = served.aces.iter().map(|a| &a.principal).collect();
    assert_eq!(
        principals,
        [&href("editor"), &href("../__/admin"), &href("../box2/guest"), &Principal::All]
    );
    assert_eq!(served.aces[1].privileges, ["read", "write-acl"]);

    // Serving and setting again is stable
    docs.set_acl(&served).await.unwrap();
    assert_eq!(docs.acl().await.unwrap(), served);

    control.delete_role(&admin).await.unwrap();
    let after = docs.acl().await.unwrap();
    assert_eq!(after.aces.len(), 3);
    assert!(after.aces.iter().all(|a| a.principal != href("../__/admin")));
}

#[tokio::test]
async fn test_acl_rejections() {
    let t = TestEngine::new().await;
    let cell = t.engine.cell(CELL).await.unwrap();
    let box1 = t.engine.box_of(&cell, BOX).await.unwrap();
    t.engine
        .control()
        .create_role(&cell.id, Some(&box1.id), "editor")
        .await
        .unwrap();
    let mut root = t.open("").await;
    let with = |aces: Vec<Ace>| Acl {
        aces,
        ..Acl::default()
    };

    assert!(matches!(
        bad_request_reason(root.set_acl(&with(vec![ace(href("nobody"), &["read"])])).await),
        BadRequestReason::RoleNotFound(_)
    ));
    assert!(matches!(
        bad_request_reason(
            root.set_acl(&with(vec![ace(href("https://unit.example/bob/__role/box1/editor"), &["read"])]))
                .await
        ),
        BadRequestReason::RoleNotFound(_)
    ));
    assert!(matches!(
        bad_request_reason(root.set_acl(&with(vec![ace(href("../nobox/editor"), &["read"])])).await),
        BadRequestReason::BoxNotFound(_)
    ));
    assert!(matches!(
        bad_request_reason(root.set_acl(&with(vec![ace(href("editor"), &["social"])])).await),
        BadRequestReason::InvalidAcl(_)
    ));
    assert!(matches!(
        bad_request_reason(root.set_acl(&with(vec![ace(href("editor"), &[])])).await),
        BadRequestReason::InvalidAcl(_)
    ));
    let bad_authz = Acl {
        require_schema_authz: Some("secret".into()),
        ..Acl::default()
    };
    assert!(matches!(
        bad_request_reason(root.set_acl(&bad_authz).await),
        BadRequestReason::InvalidAcl(_)
    ));

    assert!(root.node().unwrap().acl.is_none());
}

#[tokio::test]
async fn test_cell_acl_uses_cell_privileges_and_default_box_base() {
    let t = TestEngine::new().await;
    let cell = t.engine.cell(CELL).await.unwrap();
    let box1 = t.engine.box_of(&cell, BOX).await.unwrap();
    let control = t.engine.control();
    control.create_role(&cell.id, None, "auditor").await.unwrap();
    control.create_role(&cell.id, Some(&box1.id), "editor").await.unwrap();

    assert!(t.engine.cell_acl(CELL).await.unwrap().aces.is_empty());

    // Box privileges are refused at Cell level, and nothing is stored
    assert!(matches!(
        bad_request_reason(
            t.engine
                .set_cell_acl(CELL, &Acl {
                    aces: vec![ace(href("auditor"), &["read"])],
                    ..Acl::default()
                })
                .await
        ),
        BadRequestReason::InvalidAcl(_)
    ));
    assert!(t.engine.cell_acl(CELL).await.unwrap().aces.is_empty());

    t.engine
        .set_cell_acl(CELL, &Acl {
            aces: vec![
                ace(href("auditor"), &["auth-read", "log-read"]),
                ace(href("../box1/editor"), &["social"]),
            ],
            ..Acl::default()
        })
        .await
        .unwrap();

    let served = t.engine.cell_acl(CELL).await.unwrap();
    assert_eq!(served.base.as_deref(), Some("https://unit.example/alice/__role/__/"));
    let principals: Vec<&Principal> = served.aces.iter().map(|a| &a.principal).collect();
    assert_eq!(principals, [&href("auditor"), &href("../box1/editor")]);
    assert_eq!(served.aces[0].privileges, ["auth-read", "log-read"]);

    // The Cell root carries the ACL, Box roots do not
    let store = t.engine.context().store.as_ref();
    let root = load_node(store, &cell.root_node_id).await.unwrap().unwrap();
    assert_eq!(root.doc.acl.unwrap().aces.len(), 2);
    assert!(t.open("").await.node().unwrap().acl.is_none());
}

#[tokio::test]
async fn test_trans_cell_viewer_reads_only_while_linked() {
    let t = TestEngine::new().await;
    t.engine.create_cell("bob").await.unwrap();
    t.put("report.txt", b"numbers").await.unwrap();

    let cell = t.engine.cell(CELL).await.unwrap();
    let control = t.engine.control();
    let reader = control.create_role(&cell.id, None, "reader").await.unwrap();
    let bob = control.create_ext_cell(&cell.id, "https://unit.example/bob/").await.unwrap();
    let relation = control.create_relation(&cell.id, None, "partners").await.unwrap();
    let viewer = control
        .create_ext_role(&cell.id, &relation.id, "https://unit.example/bob/__role/__/viewer")
        .await
        .unwrap();
    control
        .link(&cell.id, (DocType::ExtCell, &bob.id), (DocType::Relation, &relation.id))
        .await
        .unwrap();
    control
        .link(&cell.id, (DocType::ExtRole, &viewer.id), (DocType::Role, &reader.id))
        .await
        .unwrap();

    t.open("report.txt")
        .await
        .set_acl(&Acl {
            aces: vec![ace(href("../__/reader"), &["read"])],
            ..Acl::default()
        })
        .await
        .unwrap();

    let token = TransCellToken {
        issuer: "https://unit.example/bob/".into(),
        subject: "https://unit.example/bob/#carol".into(),
        ext_cell_url: "https://unit.example/bob/".into(),
        roles: vec!["https://unit.example/bob/__role/__/viewer".into()],
    };
    let roles = t.engine.trust_resolver().resolve(&cell, &token).await.unwrap();
    assert_eq!(roles.len(), 1);
    assert_eq!(roles[0].name, "reader");
    assert_eq!(roles[0].url(&cell.url), "https://unit.example/alice/__role/__/reader");

    let file = t.open("report.txt").await;
    let chain = vec![file.node().unwrap().clone()];
    let access = t.engine.access_for_token(CELL, &token).await.unwrap();
    assert!(access.has_privilege(&chain, Privilege::ReadContent));
    assert!(!access.has_privilege(&chain, Privilege::WriteContent));

    // A token without the asserted role gets nothing
    let plain = TransCellToken {
        roles: Vec::new(),
        ..token.clone()
    };
    assert!(t.engine.trust_resolver().resolve(&cell, &plain).await.unwrap().is_empty());

    control
        .unlink(&cell.id, (DocType::ExtRole, &viewer.id), (DocType::Role, &reader.id))
        .await
        .unwrap();
    let access = t.engine.access_for_token(CELL, &token).await.unwrap();
    assert!(!access.has_privilege(&chain, Privilege::ReadContent));
    assert_eq!(access, AccessContext::with_roles(Vec::<String>::new()));
}
