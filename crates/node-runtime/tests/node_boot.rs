//! Boot smoke test: a node comes up from an empty data directory, connects
//! genesis, and serves its chain and mempool surfaces.

use node_runtime::{Node, NodeConfig};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn node_boots_from_empty_data_dir() {
    let dir = tempfile::tempdir().unwrap();

    let mut config = NodeConfig::default();
    config.data_dir = dir.path().to_string_lossy().to_string();
    config.p2p.listen_addr = "127.0.0.1:0".to_string();
    config.mining.enabled = false;

    let node = Node::start(config).await.unwrap();

    let head = node.chain.head().expect("genesis must be connected");
    assert_eq!(head.height(), 0);
    assert!(node.mempool.is_empty());

    // The canonical index agrees with the head pointer.
    let genesis = node
        .chain
        .canonical_block_by_height(0)
        .unwrap()
        .expect("height 0 is canonical");
    assert_eq!(genesis.hash, head.hash);
}
