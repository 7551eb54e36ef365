//! Integration tests for account liveness.
//!
//! Hosted pods and the node itself are refreshed into the account record
//! on keep-alive; entries that stop changing are dropped by whichever node
//! holds the record.


use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use burrow_api::{time, AccountNodeState, AccountPodState, NodeType, RestartPolicy, Vector3};
use burrow_id::AccountUuid;
use burrow_node::kvs::AccountKvs;
use harness::{hello_spec, Cluster, A, B};

#[tokio::test]
async fn test_keep_alive_records_hosted_pods_and_node() {
    let mut cluster = Cluster::new(&[A, B]).await;
    let digest = cluster
        .node(A)
        .controllers
        .pods
        .create("hello", "alice", A, hello_spec(RestartPolicy::Always))
        .await
        .unwrap();
    cluster.tick().await;
    cluster.tick().await;
    cluster.keep_alive().await;

    let accounts = Arc::clone(&cluster.node(B).controllers.accounts);
    let pods = accounts.get_pod_state("alice").await.unwrap();
    assert_eq!(pods.len(), 1);
    assert_eq!(pods[&digest.uuid].running_node, A);

    let nodes = accounts.get_node_state("alice").await.unwrap();
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[A].name, "node-aaaa");
    assert_eq!(nodes[B].node_type, NodeType::Server);

    // Refreshing again does not duplicate entries.
    cluster.keep_alive().await;
    assert_eq!(accounts.get_pod_state("alice").await.unwrap().len(), 1);
    assert_eq!(accounts.get_node_state("alice").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_account_aggregation() {
    let cluster = Cluster::new(&[A]).await;
    let accounts = &cluster.node(A).controllers.accounts;
    let uuid = "6f1c2a7e-3b0d-4c1e-9f55-0a8b7c6d5e41";

    let update = |timestamp: &str| {
        let pods = BTreeMap::from([(
            uuid.to_string(),
            AccountPodState {
                running_node: A.to_string(),
                timestamp: timestamp.to_string(),
            },
        )]);
        let node = AccountNodeState {
            name: "n1".to_string(),
            timestamp: timestamp.to_string(),
            node_type: NodeType::Server,
            position: Some(Vector3::new(139.7, 35.7, 10.0)),
        };
        (pods, node)
    };

    let (pods, node) = update("2023-04-15T17:30:40+09:00");
    accounts
        .update_pod_and_node_state("alice", pods, A, Some(node))
        .await
        .unwrap();
    let (pods, node) = update("2023-04-15T17:31:10+09:00");
    accounts
        .update_pod_and_node_state("alice", pods, A, Some(node))
        .await
        .unwrap();

    let account = cluster
        .node(A)
        .kvs
        .accounts()
        .get_by_name("alice")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.meta.uuid, AccountUuid::from_name("alice").to_string());
    assert_eq!(account.state.pods.len(), 1);
    assert_eq!(account.state.nodes.len(), 1);
    assert_eq!(account.state.pods[uuid].timestamp, "2023-04-15T17:31:10+09:00");
    assert_eq!(account.state.nodes[A].timestamp, "2023-04-15T17:31:10+09:00");
}

#[tokio::test(start_paused = true)]
async fn test_stale_entries_are_removed() {
    let mut cluster = Cluster::new(&[A]).await;
    let accounts = &cluster.node(A).controllers.accounts;
    let stale = "6f1c2a7e-3b0d-4c1e-9f55-0a8b7c6d5e41";
    accounts
        .update_pod_and_node_state(
            "alice",
            BTreeMap::from([(
                stale.to_string(),
                AccountPodState {
                    running_node: B.to_string(),
                    timestamp: time::now(),
                },
            )]),
            A,
            None,
        )
        .await
        .unwrap();

    // First sighting starts the clock.
    cluster.tick().await;
    tokio::time::advance(Duration::from_secs(120)).await;
    cluster.tick().await;
    assert!(cluster
        .node(A)
        .controllers
        .accounts
        .get_pod_state("alice")
        .await
        .unwrap()
        .contains_key(stale));

    tokio::time::advance(Duration::from_secs(61)).await;
    cluster.tick().await;
    assert!(!cluster
        .node(A)
        .controllers
        .accounts
        .get_pod_state("alice")
        .await
        .unwrap()
        .contains_key(stale));

    let key = AccountKvs::key(AccountUuid::from_name("alice").as_str());
    assert!(matches!(cluster.network.peek(&key), Some(Some(_))));
}
