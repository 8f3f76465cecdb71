use dfs_client::{CreateOptions, DfsClient, File};
use dfs_common::config::{MasterConfig, NetworkConfig, WorkerConfig};
use dfs_common::DfsError;
use dfs_master::{CoordinatorServer, LoadBalancer, MasterNode};
use dfs_worker::{DataNodeServer, WorkerNode};
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use uuid::Uuid;

struct TestCluster {
    master_address: String,
    _dirs: Vec<TempDir>,
}

impl TestCluster {
    async fn start(worker_count: usize) -> Self {
        let mut dirs = Vec::new();
        let mut worker_addresses = Vec::new();

        for _ in 0..worker_count {
            let dir = TempDir::new().unwrap();
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let address = listener.local_addr().unwrap().to_string();
            let config = WorkerConfig {
                storage_dir: dir.path().to_path_buf(),
                advertise_address: Some(address.clone()),
                ..Default::default()
            };
            let worker = Arc::new(WorkerNode::new(&config, Uuid::new_v4()).await.unwrap());
            tokio::spawn(DataNodeServer::new(worker, NetworkConfig::default()).serve_with_listener(listener));
            worker_addresses.push(address);
            dirs.push(dir);
        }

        let dir = TempDir::new().unwrap();
        let config = MasterConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let lb = LoadBalancer::connect(&worker_addresses, &NetworkConfig::default(), Duration::from_secs(2)).await;
        let master = Arc::new(MasterNode::open(&config, Arc::new(lb), None).await.unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let master_address = listener.local_addr().unwrap().to_string();
        tokio::spawn(CoordinatorServer::new(master, NetworkConfig::default()).serve_with_listener(listener));
        dirs.push(dir);

        Self {
            master_address,
            _dirs: dirs,
        }
    }
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 253) as u8).collect()
}

fn small_blocks() -> CreateOptions {
    CreateOptions::new()
        .with_project("proj")
        .with_owner("tester")
        .with_block_size(1000)
        .with_chunk_size(256)
}

#[tokio::test]
async fn test_multi_block_round_trip() {
    let cluster = TestCluster::start(2).await;
    let client = DfsClient::connect(&cluster.master_address).await.unwrap();
    let data = payload(3500);

    let mut writer = client.create("raw/data.bin", small_blocks()).unwrap();
    // Uneven writes, one of them larger than a block
    writer.write_all(&data[..10]).await.unwrap();
    writer.write_all(&data[10..2100]).await.unwrap();
    writer.write_all(&data[2100..]).await.unwrap();
    assert_eq!(writer.stat().await.unwrap().size, 3500);
    writer.close().await.unwrap();

    let inode = writer.inode().unwrap();
    assert_eq!(inode.size, 3500);
    assert_eq!(inode.blocks.len(), 4);

    let mut reader = client.open("proj", "raw/data.bin").await.unwrap();
    assert_eq!(reader.size(), 3500);
    let stat = reader.stat().await.unwrap();
    assert_eq!(stat.blocks.iter().map(|b| b.size).collect::<Vec<_>>(), vec![1000, 1000, 1000, 500]);
    assert!(stat.blocks.iter().all(|b| !b.address.is_empty()));

    let mut contents = Vec::new();
    reader.read_to_end(&mut contents).await.unwrap();
    assert_eq!(contents, data);
}

#[tokio::test]
async fn test_seek_and_block_boundaries() {
    let cluster = TestCluster::start(1).await;
    let client = DfsClient::connect(&cluster.master_address).await.unwrap();
    let data = payload(2500);

    let mut writer = client.create("seek.bin", small_blocks()).unwrap();
    writer.write_all(&data).await.unwrap();
    writer.close().await.unwrap();

    let mut reader = client.open("proj", "seek.bin").await.unwrap();

    assert_eq!(reader.seek(SeekFrom::Start(1500)).await.unwrap(), 1500);
    let mut buf = [0u8; 10];
    assert_eq!(reader.read(&mut buf).await.unwrap(), 10);
    assert_eq!(&buf, &data[1500..1510]);

    // A read never spans two blocks
    reader.seek(SeekFrom::Start(995)).await.unwrap();
    let mut buf = [0u8; 20];
    assert_eq!(reader.read(&mut buf).await.unwrap(), 5);
    assert_eq!(&buf[..5], &data[995..1000]);
    assert_eq!(reader.read(&mut buf).await.unwrap(), 20);
    assert_eq!(&buf, &data[1000..1020]);

    reader.seek(SeekFrom::End(-3)).await.unwrap();
    let mut tail = Vec::new();
    reader.read_to_end(&mut tail).await.unwrap();
    assert_eq!(tail, &data[2497..]);
    assert_eq!(reader.read(&mut buf).await.unwrap(), 0);

    assert!(matches!(
        reader.seek(SeekFrom::Start(2501)).await,
        Err(DfsError::InvalidArgument(_))
    ));
    assert!(matches!(reader.write(b"nope").await, Err(DfsError::ReadOnly(_))));
}

#[tokio::test]
async fn test_writer_sync_and_misuse() {
    let cluster = TestCluster::start(1).await;
    let client = DfsClient::connect(&cluster.master_address).await.unwrap();

    let mut writer = client.create("synced.bin", small_blocks()).unwrap();
    writer.write_all(b"first").await.unwrap();
    writer.sync().await.unwrap();
    writer.write_all(b"second").await.unwrap();
    assert_eq!(writer.stat().await.unwrap().blocks.len(), 1);

    let mut buf = [0u8; 4];
    assert!(matches!(writer.read(&mut buf).await, Err(DfsError::NotSupported(_))));
    assert!(matches!(
        writer.seek(SeekFrom::Start(0)).await,
        Err(DfsError::NotSupported(_))
    ));

    // Not visible before close
    assert!(matches!(
        client.open("proj", "synced.bin").await,
        Err(DfsError::NotFound(_))
    ));
    writer.close().await.unwrap();
    assert!(writer.write(b"late").await.is_err());

    let mut reader = client.open("proj", "synced.bin").await.unwrap();
    let mut contents = Vec::new();
    reader.read_to_end(&mut contents).await.unwrap();
    assert_eq!(contents, b"firstsecond");
}

#[tokio::test]
async fn test_empty_file() {
    let cluster = TestCluster::start(1).await;
    let client = DfsClient::connect(&cluster.master_address).await.unwrap();

    let mut writer = client.create("empty", small_blocks()).unwrap();
    writer.close().await.unwrap();

    let mut reader = client.open("proj", "empty").await.unwrap();
    assert_eq!(reader.size(), 0);
    let mut buf = [0u8; 8];
    assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn test_namespace_operations() {
    let cluster = TestCluster::start(1).await;
    let client = DfsClient::connect(&cluster.master_address).await.unwrap();

    for path in ["logs/a", "logs/b", "tables/t"] {
        let mut writer = client.create(path, small_blocks()).unwrap();
        writer.write_all(path.as_bytes()).await.unwrap();
        writer.close().await.unwrap();
    }

    assert_eq!(client.list("proj", "logs/").await.unwrap(), vec!["logs/a", "logs/b"]);

    client.rename("proj", "logs/b", "archive/b").await.unwrap();
    client.delete("proj", "logs/a").await.unwrap();
    assert_eq!(client.list("proj", "").await.unwrap(), vec!["archive/b", "tables/t"]);

    let mut reader = client.open("proj", "archive/b").await.unwrap();
    let mut contents = Vec::new();
    reader.read_to_end(&mut contents).await.unwrap();
    assert_eq!(contents, b"logs/b");

    assert!(client.create("", small_blocks()).is_err());
    client.close().await;
}
