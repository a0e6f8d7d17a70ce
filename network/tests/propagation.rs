// End-to-end mesh tests: three miner nodes over real WebSocket servers with
// in-memory stores.

use fleet_chain::{ChainEngine, MemoryRepository};
use fleet_core::{crypto, Block, ProofOfWork, Transaction, DIFFICULTY};
use fleet_keystore::Key;
use fleet_network::{client, Node};
use fleet_rpc::MinerApiClient;
use jsonrpsee::server::ServerHandle;
use std::sync::Arc;
use std::time::Duration;

async fn start_node() -> (Arc<Node>, ServerHandle) {
    use fleet_network::MinerRpc;
    use fleet_rpc::MinerApiServer;
    use jsonrpsee::server::Server;

    let engine = Arc::new(ChainEngine::new(
        Arc::new(MemoryRepository::default()),
        DIFFICULTY,
    ));
    let server = Server::builder().build("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    let node = Node::new(addr.to_string(), engine, Key::generate());
    let handle = server.start(MinerRpc::new(Arc::clone(&node)).into_rpc());
    (node, handle)
}

async fn connect_pairwise(nodes: &[&Arc<Node>]) {
    for from in nodes {
        for to in nodes {
            if from.addr != to.addr {
                let conn = client::connect(&to.addr).await.unwrap();
                from.peers.insert_connection(to.addr.clone(), conn).await;
            }
        }
    }
}

fn sealed_child(prev: &Block, key: &Key, data: &[u8]) -> Block {
    let mut block = Block::new(
        prev.hash.clone(),
        prev.token.clone(),
        key.public_key.clone(),
        vec![Transaction::new(data.to_vec())],
    );
    block.sign(key.signing_key()).unwrap();
    let (nonce, hash) = ProofOfWork::new(&block).run();
    block.nonce = nonce;
    block.hash = hash;
    block
}

async fn wait_for_block(node: &Arc<Node>, hash: &[u8]) {
    for _ in 0..200 {
        if node.engine.contains(hash).unwrap() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("block never arrived at {}", node.addr);
}

#[tokio::test]
async fn test_propagated_block_reaches_every_node() {
    let (a, _ha) = start_node().await;
    let (b, _hb) = start_node().await;
    let (c, _hc) = start_node().await;
    connect_pairwise(&[&a, &b, &c]).await;

    let device = Key::generate();
    let token = crypto::sign(device.signing_key(), b"adminpass");
    let genesis = a.engine.genesis_block(&token, device.signing_key()).unwrap();
    let child = sealed_child(&genesis, &device, b"temp=21.5");

    let caller = client::connect(&a.addr).await.unwrap();
    assert!(caller
        .propagate_block(hex::encode(genesis.serialize().unwrap()))
        .await
        .unwrap());
    assert!(caller
        .propagate_block(hex::encode(child.serialize().unwrap()))
        .await
        .unwrap());

    for node in [&a, &b, &c] {
        wait_for_block(node, &genesis.hash).await;
        wait_for_block(node, &child.hash).await;
        assert_eq!(node.engine.height(&token).unwrap(), 2);
    }

    // Re-propagating the same block is accepted and changes nothing.
    assert!(caller
        .propagate_block(hex::encode(child.serialize().unwrap()))
        .await
        .unwrap());
    assert_eq!(a.engine.height(&token).unwrap(), 2);
}

#[tokio::test]
async fn test_mine_seals_and_gossips() {
    let (a, _ha) = start_node().await;
    let (b, _hb) = start_node().await;
    connect_pairwise(&[&a, &b]).await;

    let device = Key::generate();
    let token = crypto::sign(device.signing_key(), b"adminpass");
    let genesis = a.engine.genesis_block(&token, device.signing_key()).unwrap();
    let caller = client::connect(&a.addr).await.unwrap();
    caller
        .propagate_block(hex::encode(genesis.serialize().unwrap()))
        .await
        .unwrap();
    wait_for_block(&b, &genesis.hash).await;

    // A partially formed block: signed, but nonce and hash unset.
    let mut partial = Block::new(
        genesis.hash.clone(),
        token.clone(),
        device.public_key.clone(),
        vec![Transaction::new(&b"humidity=40"[..])],
    );
    partial.sign(device.signing_key()).unwrap();

    let sealed_hex = caller
        .mine(hex::encode(partial.serialize().unwrap()))
        .await
        .unwrap();
    let sealed = Block::deserialize(&hex::decode(sealed_hex).unwrap()).unwrap();

    assert!(ProofOfWork::new(&sealed).validate());
    assert_eq!(a.engine.height(&token).unwrap(), 2);
    wait_for_block(&b, &sealed.hash).await;
}

#[tokio::test]
async fn test_token_issuance_creates_genesis() {
    let (a, _ha) = start_node().await;
    let (b, _hb) = start_node().await;
    connect_pairwise(&[&a, &b]).await;

    let caller = client::connect(&a.addr).await.unwrap();
    let token_hex = caller
        .issue_token("device-7".to_string(), "pass".to_string())
        .await
        .unwrap();
    let token = hex::decode(token_hex).unwrap();

    assert_eq!(a.engine.height(&token).unwrap(), 1);
    let tail = a.engine.tail_hash(&token).unwrap();
    wait_for_block(&b, &tail).await;

    // Empty credentials are rejected.
    assert!(caller
        .issue_token(String::new(), "pass".to_string())
        .await
        .is_err());
}

#[tokio::test]
async fn test_fresh_node_full_sync() {
    let (a, _ha) = start_node().await;

    let device = Key::generate();
    let token = crypto::sign(device.signing_key(), b"adminpass");
    let genesis = a.engine.genesis_block(&token, device.signing_key()).unwrap();
    a.engine.admit(&genesis).await.unwrap();
    let child = sealed_child(&genesis, &device, b"temp=21.5");
    a.engine.admit(&child).await.unwrap();

    let (fresh, _hf) = start_node().await;
    let conn = client::connect(&a.addr).await.unwrap();
    fresh.peers.insert_connection(a.addr.clone(), conn).await;

    let best = client::find_best_height_node(&fresh).await;
    assert_eq!(best.as_deref(), Some(a.addr.as_str()));

    fresh.engine.clear().unwrap();
    client::download_full_chain(&fresh, &a.addr).await.unwrap();

    assert_eq!(fresh.engine.full_height().unwrap(), 2);
    assert_eq!(fresh.engine.height(&token).unwrap(), 2);
    assert_eq!(fresh.engine.tail_hash(&token).unwrap(), child.hash);
}

#[tokio::test]
async fn test_per_token_sync_applies_in_order() {
    let (a, _ha) = start_node().await;

    let device = Key::generate();
    let token = crypto::sign(device.signing_key(), b"adminpass");
    let genesis = a.engine.genesis_block(&token, device.signing_key()).unwrap();
    a.engine.admit(&genesis).await.unwrap();
    let child = sealed_child(&genesis, &device, b"one");
    a.engine.admit(&child).await.unwrap();
    let grandchild = sealed_child(&child, &device, b"two");
    a.engine.admit(&grandchild).await.unwrap();

    let (fresh, _hf) = start_node().await;
    let conn = client::connect(&a.addr).await.unwrap();
    fresh.peers.insert_connection(a.addr.clone(), conn).await;

    client::sync_chain(&fresh, &a.addr, &token).await.unwrap();
    assert_eq!(fresh.engine.height(&token).unwrap(), 3);
}

#[tokio::test]
async fn test_send_address_dial_back() {
    let (a, _ha) = start_node().await;
    let (b, _hb) = start_node().await;

    // b announces itself to a; a dials back asynchronously.
    client::send_address(&b, &a.addr).await;
    assert!(b.peers.is_connected(&a.addr).await);

    for _ in 0..200 {
        if a.peers.is_connected(&b.addr).await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(a.peers.is_connected(&b.addr).await);

    // The address stream now reports the link on both sides.
    let conn = b.peers.connection(&a.addr).await.unwrap();
    let addrs = client::peer_addresses(&conn).await;
    assert!(addrs.contains(&b.addr));
}

#[tokio::test]
async fn test_ping() {
    let (a, _ha) = start_node().await;
    assert!(client::ping(&a.addr).await);
    assert!(!client::ping("127.0.0.1:1").await);
}
