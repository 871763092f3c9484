use std::time::Duration;

use shardmgr::pb::monitoring_service_client::MonitoringServiceClient;
use shardmgr::pb::node_service_client::NodeServiceClient;
use shardmgr::pb::shard_service_client::ShardServiceClient;
use shardmgr::pb::{
    GetDistributionRequest, GetHealthRequest, GetShardInfoRequest, HeartbeatRequest,
    ListNodesRequest, RegisterShardRequest, Shard,
};
use uuid::Uuid;

mod support;

#[tokio::test]
async fn unassigned_shard_is_placed_and_delivered() -> anyhow::Result<()> {
    let (coordinator, shutdown, _server) = support::spawn_coordinator().await?;
    let (addr1, mut rx1, _n1) = support::spawn_app_node().await?;
    let (addr2, mut rx2, _n2) = support::spawn_app_node().await?;

    let n1 = Uuid::new_v4();
    let n2 = Uuid::new_v4();
    support::register_node(coordinator, n1, addr1).await?;
    support::register_node(coordinator, n2, addr2).await?;

    let shard_id = Uuid::new_v4();
    let mut shards = ShardServiceClient::connect(format!("http://{coordinator}")).await?;
    let response = shards
        .register_shard(RegisterShardRequest {
            shard: Some(Shard {
                id: shard_id.to_string(),
                r#type: "t".to_string(),
                size: 1,
                node_id: String::new(),
                status: "pending".to_string(),
            }),
        })
        .await?
        .into_inner();
    assert!(response.success, "{}", response.message);

    // Exactly one owner, chosen from the registered nodes, at version 1.
    let info = shards
        .get_shard_info(GetShardInfoRequest {
            shard_id: shard_id.to_string(),
        })
        .await?
        .into_inner()
        .shard
        .expect("shard present");
    let owner: Uuid = info.node_id.parse()?;
    assert!(owner == n1 || owner == n2);

    // The chosen node receives AddShard with the primary role.
    let delivery = match owner == n1 {
        true => support::expect_delivery(&mut rx1, Duration::from_secs(2)).await,
        false => support::expect_delivery(&mut rx2, Duration::from_secs(2)).await,
    }
    .expect("AddShard delivered");
    assert_eq!(delivery.shard_id, shard_id.to_string());
    assert_eq!(delivery.role, "primary");

    let _ = shutdown.send(true);
    Ok(())
}

#[tokio::test]
async fn shards_spread_across_the_fleet() -> anyhow::Result<()> {
    let (coordinator, shutdown, _server) = support::spawn_coordinator().await?;
    let (addr1, mut rx1, _n1) = support::spawn_app_node().await?;
    let (addr2, mut rx2, _n2) = support::spawn_app_node().await?;

    support::register_node(coordinator, Uuid::new_v4(), addr1).await?;
    support::register_node(coordinator, Uuid::new_v4(), addr2).await?;

    let mut shards = ShardServiceClient::connect(format!("http://{coordinator}")).await?;
    for _ in 0..4 {
        let response = shards
            .register_shard(RegisterShardRequest {
                shard: Some(Shard {
                    id: Uuid::new_v4().to_string(),
                    r#type: "t".to_string(),
                    size: 1,
                    node_id: String::new(),
                    status: "pending".to_string(),
                }),
            })
            .await?
            .into_inner();
        assert!(response.success);
    }

    // Least-loaded placement alternates between the two empty nodes.
    let mut first = 0;
    let mut second = 0;
    for _ in 0..4 {
        tokio::select! {
            Some(_) = rx1.recv() => first += 1,
            Some(_) = rx2.recv() => second += 1,
            _ = tokio::time::sleep(Duration::from_secs(2)) => break,
        }
    }
    assert_eq!(first, 2, "expected an even spread");
    assert_eq!(second, 2, "expected an even spread");

    let mut monitoring = MonitoringServiceClient::connect(format!("http://{coordinator}")).await?;
    let distribution = monitoring
        .get_distribution(GetDistributionRequest {})
        .await?
        .into_inner();
    let total: usize = distribution
        .node_shards
        .values()
        .map(|list| list.shard_ids.len())
        .sum();
    assert_eq!(total, 4);

    let _ = shutdown.send(true);
    Ok(())
}

#[tokio::test]
async fn node_lifecycle_and_health() -> anyhow::Result<()> {
    let (coordinator, shutdown, _server) = support::spawn_coordinator().await?;
    let (addr, _rx, _n) = support::spawn_app_node().await?;

    let node_id = Uuid::new_v4();
    support::register_node(coordinator, node_id, addr).await?;

    let mut nodes = NodeServiceClient::connect(format!("http://{coordinator}")).await?;
    let listed = nodes.list_nodes(ListNodesRequest {}).await?.into_inner();
    assert_eq!(listed.nodes.len(), 1);
    assert_eq!(listed.nodes[0].id, node_id.to_string());
    assert_eq!(listed.nodes[0].status, "active");

    // Heartbeat mutates status and load.
    let response = nodes
        .heartbeat(HeartbeatRequest {
            node_id: node_id.to_string(),
            status: "draining".to_string(),
            load: 7,
        })
        .await?
        .into_inner();
    assert!(response.success);

    // Lenient mode: heartbeats for unknown nodes succeed.
    let response = nodes
        .heartbeat(HeartbeatRequest {
            node_id: Uuid::new_v4().to_string(),
            status: "active".to_string(),
            load: 0,
        })
        .await?
        .into_inner();
    assert!(response.success);

    let mut monitoring = MonitoringServiceClient::connect(format!("http://{coordinator}")).await?;
    let health = monitoring.get_health(GetHealthRequest {}).await?.into_inner();
    assert_eq!(health.active_nodes, 0);
    assert_eq!(health.failed_nodes, 0);

    let _ = shutdown.send(true);
    Ok(())
}

#[tokio::test]
async fn malformed_and_missing_ids_map_to_status_codes() -> anyhow::Result<()> {
    let (coordinator, shutdown, _server) = support::spawn_coordinator().await?;

    let mut shards = ShardServiceClient::connect(format!("http://{coordinator}")).await?;
    let err = shards
        .get_shard_info(GetShardInfoRequest {
            shard_id: "not-a-uuid".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::InvalidArgument);

    let err = shards
        .get_shard_info(GetShardInfoRequest {
            shard_id: Uuid::new_v4().to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::NotFound);

    // Registering a shard with no nodes in the fleet is a failed precondition.
    let err = shards
        .register_shard(RegisterShardRequest {
            shard: Some(Shard {
                id: Uuid::new_v4().to_string(),
                r#type: "t".to_string(),
                size: 1,
                node_id: String::new(),
                status: "pending".to_string(),
            }),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::FailedPrecondition);

    let _ = shutdown.send(true);
    Ok(())
}
