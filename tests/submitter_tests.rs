//! Tests for contract calls through the transaction submitter against a mock node

use std::time::{Duration, Instant};

use ethers::types::U256;
use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use evm_wallet_core::blockchain::{
    contract::SimpleStorage,
    key_material::Account,
    models::{ChainTarget, SessionContext, SubmissionError, TxStatus},
    providers::{ExplorerClient, HttpTransport, RpcClient},
    services::{ConfirmationPolicy, TransactionSubmitter},
};

const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
const CONTRACT: &str = "0x1c5afd90714E2a40547246DDD92668F2715caF78";
const NODE_TX_HASH: &str = "0x88df016429689c079f3b2f6ad39fa052532c56795b733da78a91ebe6a713944b";

fn rpc_body(result: serde_json::Value) -> String {
    json!({ "jsonrpc": "2.0", "id": 1, "result": result }).to_string()
}

fn method(name: &str) -> Matcher {
    Matcher::PartialJson(json!({ "method": name }))
}

fn chain(server: &ServerGuard) -> ChainTarget {
    ChainTarget::new("sepolia", 11155111, "ETH", &server.url())
}

fn session(server: &ServerGuard) -> SessionContext {
    SessionContext {
        chain: chain(server),
        storage_contract: CONTRACT.parse().unwrap(),
        gas_limit: U256::from(100_000u64),
        gas_price_wei: U256::from(1_000_000_000u64),
    }
}

fn clients() -> (RpcClient, ExplorerClient) {
    let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
    (RpcClient::new(transport.clone()), ExplorerClient::new(transport))
}

fn submitter(rpc: RpcClient, poll_ms: u64, wait_ms: u64) -> TransactionSubmitter {
    TransactionSubmitter::new(
        rpc,
        ConfirmationPolicy {
            poll_interval: Duration::from_millis(poll_ms),
            max_wait: Duration::from_millis(wait_ms),
        },
    )
}

async fn mock_nonce(server: &mut ServerGuard) -> mockito::Mock {
    server
        .mock("POST", "/")
        .match_body(method("eth_getTransactionCount"))
        .with_header("content-type", "application/json")
        .with_body(rpc_body(json!("0x3")))
        .create_async()
        .await
}

#[tokio::test]
async fn set_then_get_round_trips_through_the_node() {
    let mut server = Server::new_async().await;
    let (rpc, explorer) = clients();
    let account = Account::load(KEY).unwrap();

    let nonce = mock_nonce(&mut server).await;
    // The raw transaction must carry set(42) as call data.
    let broadcast = server
        .mock("POST", "/")
        .match_body(Matcher::AllOf(vec![
            method("eth_sendRawTransaction"),
            Matcher::Regex("60fe47b10{62}2a".to_string()),
        ]))
        .with_header("content-type", "application/json")
        .with_body(rpc_body(json!(NODE_TX_HASH)))
        .expect(1)
        .create_async()
        .await;
    let receipt = server
        .mock("POST", "/")
        .match_body(method("eth_getTransactionReceipt"))
        .with_header("content-type", "application/json")
        .with_body(rpc_body(json!({
            "transactionHash": NODE_TX_HASH,
            "blockNumber": "0x5a",
            "status": "0x1",
            "gasUsed": "0xa410"
        })))
        .create_async()
        .await;
    let stored = server
        .mock("POST", "/")
        .match_body(Matcher::AllOf(vec![method("eth_call"), Matcher::Regex("0x6d4ce63c".to_string())]))
        .with_header("content-type", "application/json")
        .with_body(rpc_body(json!(
            "0x000000000000000000000000000000000000000000000000000000000000002a"
        )))
        .create_async()
        .await;

    let session = session(&server);
    let storage = SimpleStorage::new(session.storage_contract, rpc.clone(), explorer);
    let submitter = submitter(rpc, 10, 1000);

    let mined = storage
        .set(&submitter, account, &session, U256::from(42u64))
        .await
        .unwrap();
    assert_eq!(mined.status, TxStatus::Success);
    assert_eq!(mined.block_number, 90);
    assert_eq!(format!("{:?}", mined.tx_hash), NODE_TX_HASH);

    assert_eq!(storage.get(&session.chain).await.unwrap(), U256::from(42u64));

    nonce.assert_async().await;
    broadcast.assert_async().await;
    receipt.assert_async().await;
    stored.assert_async().await;
}

#[tokio::test]
async fn reverted_transaction_is_a_receipt_not_an_error() {
    let mut server = Server::new_async().await;
    let (rpc, explorer) = clients();
    let account = Account::load(KEY).unwrap();

    let _nonce = mock_nonce(&mut server).await;
    let _broadcast = server
        .mock("POST", "/")
        .match_body(method("eth_sendRawTransaction"))
        .with_body(rpc_body(json!(NODE_TX_HASH)))
        .create_async()
        .await;
    let _receipt = server
        .mock("POST", "/")
        .match_body(method("eth_getTransactionReceipt"))
        .with_body(rpc_body(json!({ "blockNumber": "0x5b", "status": "0x0", "gasUsed": "0x5208" })))
        .create_async()
        .await;

    let session = session(&server);
    let storage = SimpleStorage::new(session.storage_contract, rpc.clone(), explorer);
    let receipt = storage
        .set(&submitter(rpc, 10, 1000), account, &session, U256::from(7u64))
        .await
        .unwrap();
    assert_eq!(receipt.status, TxStatus::Reverted);
    assert_eq!(receipt.gas_used, U256::from(21000u64));
}

#[tokio::test]
async fn broadcast_rejection_keeps_node_text() {
    let mut server = Server::new_async().await;
    let (rpc, explorer) = clients();
    let account = Account::load(KEY).unwrap();

    let _nonce = mock_nonce(&mut server).await;
    let _broadcast = server
        .mock("POST", "/")
        .match_body(method("eth_sendRawTransaction"))
        .with_body(
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32000, "message": "insufficient funds for gas * price + value" }
            })
            .to_string(),
        )
        .create_async()
        .await;
    let receipt = server
        .mock("POST", "/")
        .match_body(method("eth_getTransactionReceipt"))
        .expect(0)
        .create_async()
        .await;

    let session = session(&server);
    let storage = SimpleStorage::new(session.storage_contract, rpc.clone(), explorer);
    let err = storage
        .set(&submitter(rpc, 10, 1000), account, &session, U256::from(1u64))
        .await
        .unwrap_err();

    match err {
        SubmissionError::Broadcast(message) => {
            assert_eq!(message, "insufficient funds for gas * price + value")
        }
        other => panic!("expected broadcast rejection, got {other:?}"),
    }
    receipt.assert_async().await;
}

#[tokio::test]
async fn missing_receipt_times_out_with_recheck_advice() {
    let mut server = Server::new_async().await;
    let (rpc, explorer) = clients();
    let account = Account::load(KEY).unwrap();

    let _nonce = mock_nonce(&mut server).await;
    let _broadcast = server
        .mock("POST", "/")
        .match_body(method("eth_sendRawTransaction"))
        .with_body(rpc_body(json!(NODE_TX_HASH)))
        .create_async()
        .await;
    // 50ms interval over 250ms: five lookups, all pending.
    let pending = server
        .mock("POST", "/")
        .match_body(method("eth_getTransactionReceipt"))
        .with_body(rpc_body(json!(null)))
        .expect(5)
        .create_async()
        .await;

    let session = session(&server);
    let storage = SimpleStorage::new(session.storage_contract, rpc.clone(), explorer);
    let err = storage
        .set(&submitter(rpc, 50, 250), account, &session, U256::from(1u64))
        .await
        .unwrap_err();

    match &err {
        SubmissionError::ConfirmationTimeout { tx_hash, .. } => {
            assert_eq!(format!("{:?}", tx_hash), NODE_TX_HASH)
        }
        other => panic!("expected confirmation timeout, got {other:?}"),
    }
    let message = err.to_string();
    assert!(message.contains("may still confirm"));
    assert!(message.contains("re-check"));
    pending.assert_async().await;
}

#[tokio::test]
async fn transient_receipt_errors_count_as_attempts() {
    let mut server = Server::new_async().await;
    let (rpc, _) = clients();
    let account = Account::load(KEY).unwrap();

    let _nonce = mock_nonce(&mut server).await;
    let _broadcast = server
        .mock("POST", "/")
        .match_body(method("eth_sendRawTransaction"))
        .with_body(rpc_body(json!(NODE_TX_HASH)))
        .create_async()
        .await;
    let failing = server
        .mock("POST", "/")
        .match_body(method("eth_getTransactionReceipt"))
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let chain = chain(&server);
    let err = submitter(rpc, 50, 150)
        .submit(
            account,
            &chain,
            CONTRACT.parse().unwrap(),
            [0x60, 0xfe, 0x47, 0xb1],
            &[ethers::abi::Token::Uint(U256::one())],
            U256::from(100_000u64),
            U256::from(1_000_000_000u64),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SubmissionError::ConfirmationTimeout { .. }));
    failing.assert_async().await;
}

#[tokio::test]
async fn nonce_failure_stops_before_signing() {
    let mut server = Server::new_async().await;
    let (rpc, explorer) = clients();
    let account = Account::load(KEY).unwrap();

    let _nonce = server
        .mock("POST", "/")
        .match_body(method("eth_getTransactionCount"))
        .with_status(500)
        .create_async()
        .await;
    let broadcast = server
        .mock("POST", "/")
        .match_body(method("eth_sendRawTransaction"))
        .expect(0)
        .create_async()
        .await;

    let session = session(&server);
    let storage = SimpleStorage::new(session.storage_contract, rpc.clone(), explorer);
    let err = storage
        .set(&submitter(rpc, 10, 100), account, &session, U256::from(1u64))
        .await
        .unwrap_err();
    assert!(matches!(err, SubmissionError::Nonce(_)));
    broadcast.assert_async().await;
}

#[tokio::test]
async fn stored_value_falls_back_to_explorer_proxy() {
    let mut node = Server::new_async().await;
    let mut explorer_server = Server::new_async().await;
    let (rpc, explorer) = clients();

    let _down = node
        .mock("POST", "/")
        .match_body(method("eth_call"))
        .with_status(502)
        .create_async()
        .await;
    let proxy = explorer_server
        .mock("GET", "/")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("module".into(), "proxy".into()),
            Matcher::UrlEncoded("action".into(), "eth_call".into()),
            Matcher::UrlEncoded("data".into(), "0x6d4ce63c".into()),
            Matcher::UrlEncoded("apikey".into(), "explorer-key".into()),
        ]))
        .with_body(rpc_body(json!(
            "0x0000000000000000000000000000000000000000000000000000000000000007"
        )))
        .create_async()
        .await;

    let chain = chain(&node).with_explorer(evm_wallet_core::blockchain::models::ApiEndpoint::new(
        explorer_server.url(),
        "explorer-key",
    ));
    let storage = SimpleStorage::new(CONTRACT.parse().unwrap(), rpc, explorer);
    assert_eq!(storage.get(&chain).await.unwrap(), U256::from(7u64));
    proxy.assert_async().await;
}

/// A node that answers nonce and broadcast calls but never answers receipt lookups.
async fn stalling_node() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(answer_or_stall(socket));
        }
    });
    url
}

async fn answer_or_stall(mut socket: TcpStream) {
    let request = read_request(&mut socket).await;
    let result = if request.contains("eth_getTransactionCount") {
        json!("0x3")
    } else if request.contains("eth_sendRawTransaction") {
        json!(NODE_TX_HASH)
    } else {
        // Hold the connection open without replying.
        std::future::pending::<()>().await;
        return;
    };
    let body = rpc_body(result);
    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await.unwrap();
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf);
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[tokio::test]
async fn hung_receipt_lookup_does_not_outlast_max_wait() {
    let url = stalling_node().await;
    let account = Account::load(KEY).unwrap();
    // The provider timeout alone would hold every lookup for five seconds.
    let rpc = RpcClient::new(HttpTransport::new(Duration::from_secs(5)).unwrap());
    let chain = ChainTarget::new("sepolia", 11155111, "ETH", &url);

    let started = Instant::now();
    let err = submitter(rpc, 50, 250)
        .submit(
            account,
            &chain,
            CONTRACT.parse().unwrap(),
            [0x60, 0xfe, 0x47, 0xb1],
            &[ethers::abi::Token::Uint(U256::one())],
            U256::from(100_000u64),
            U256::from(1_000_000_000u64),
        )
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    match err {
        SubmissionError::ConfirmationTimeout { tx_hash, waited } => {
            assert_eq!(format!("{:?}", tx_hash), NODE_TX_HASH);
            assert_eq!(waited, Duration::from_millis(250));
        }
        other => panic!("expected confirmation timeout, got {other:?}"),
    }
    assert!(elapsed < Duration::from_secs(2), "waited {elapsed:?}");
}
