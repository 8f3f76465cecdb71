//! gRPC server for the data-node API

use crate::worker::WorkerNode;
use dfs_common::config::NetworkConfig;
use dfs_common::proto::data_node_server::{DataNode, DataNodeServer as DataNodeGrpcServer};
use dfs_common::proto::{
    BlockChecksumResponse, BlockIdRequest, Empty, FetchBlockResponse, PushBlockRequest, PushBlockResponse,
    WorkerInfoResponse,
};
use dfs_common::rpc::{PushBlockFrame, PushBlockResult};
use dfs_common::{DfsError, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, error, info};

/// Data-node gRPC server
pub struct DataNodeServer {
    worker: Arc<WorkerNode>,
    network: NetworkConfig,
}

impl DataNodeServer {
    pub fn new(worker: Arc<WorkerNode>, network: NetworkConfig) -> Self {
        Self { worker, network }
    }

    /// Bind `bind_address` and serve until the task is dropped
    pub async fn serve(self, bind_address: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_address).await?;
        info!("Data-node gRPC server listening on {}", bind_address);
        self.serve_with_listener(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve_with_listener(self, listener: TcpListener) -> Result<()> {
        let limit = self.network.max_message_size as usize;
        let service = DataNodeGrpcServer::new(DataNodeService { worker: self.worker })
            .max_decoding_message_size(limit)
            .max_encoding_message_size(limit);

        Server::builder()
            .add_service(service)
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await?;
        Ok(())
    }
}

struct DataNodeService {
    worker: Arc<WorkerNode>,
}

impl DataNodeService {
    async fn receive_block(&self, mut stream: Streaming<PushBlockRequest>) -> Result<PushBlockResult> {
        let mut session = self.worker.begin_push();
        loop {
            let message = match stream.message().await {
                Ok(Some(message)) => message,
                Ok(None) => return session.finish().await,
                Err(status) => {
                    let e = DfsError::from(status);
                    session.abort(&e);
                    return Err(e);
                }
            };
            let outcome = match PushBlockFrame::try_from(message) {
                Ok(frame) => session.handle(frame).await,
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                session.abort(&e);
                return Err(e);
            }
        }
    }
}

#[tonic::async_trait]
impl DataNode for DataNodeService {
    async fn push_block(
        &self,
        request: Request<Streaming<PushBlockRequest>>,
    ) -> std::result::Result<Response<PushBlockResponse>, Status> {
        let result = self.receive_block(request.into_inner()).await?;
        Ok(Response::new(result.into()))
    }

    type FetchBlockStream = ReceiverStream<std::result::Result<FetchBlockResponse, Status>>;

    async fn fetch_block(
        &self,
        request: Request<BlockIdRequest>,
    ) -> std::result::Result<Response<Self::FetchBlockStream>, Status> {
        let block_id = request.into_inner().block_id;
        let mut reader = self.worker.open_block(&block_id).await?;

        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            loop {
                let item = match reader.next_chunk().await {
                    Ok(Some(data)) => Ok(FetchBlockResponse { data }),
                    Ok(None) => break,
                    Err(e) => {
                        error!("Read of block {} failed mid-stream: {}", reader.block_id(), e);
                        Err(Status::from(e))
                    }
                };
                let failed = item.is_err();
                if tx.send(item).await.is_err() {
                    debug!("Reader of block {} went away", reader.block_id());
                    break;
                }
                if failed {
                    break;
                }
            }
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn get_worker_info(&self, _request: Request<Empty>) -> std::result::Result<Response<WorkerInfoResponse>, Status> {
        let info = self.worker.worker_info();
        Ok(Response::new(WorkerInfoResponse {
            worker_id: info.worker_id.to_string(),
            address: info.address,
        }))
    }

    async fn get_block_checksum(
        &self,
        request: Request<BlockIdRequest>,
    ) -> std::result::Result<Response<BlockChecksumResponse>, Status> {
        let checksum = self.worker.get_block_checksum(&request.into_inner().block_id).await?;
        Ok(Response::new(BlockChecksumResponse {
            exists: checksum.is_some(),
            checksum: checksum.unwrap_or(0),
        }))
    }

    async fn delete_block(&self, request: Request<BlockIdRequest>) -> std::result::Result<Response<Empty>, Status> {
        self.worker.delete_block(&request.into_inner().block_id).await?;
        Ok(Response::new(Empty {}))
    }

    async fn health_check(&self, _request: Request<Empty>) -> std::result::Result<Response<Empty>, Status> {
        self.worker.health_check().await?;
        Ok(Response::new(Empty {}))
    }
}
