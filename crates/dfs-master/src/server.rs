//! gRPC server for the coordinator API

use crate::master::MasterNode;
use dfs_common::config::NetworkConfig;
use dfs_common::proto::coordinator_server::{Coordinator, CoordinatorServer as CoordinatorGrpcServer};
use dfs_common::proto::{
    AllocateBlockRequest, AllocateBlockResponse, CommitCompactionRequest, CommitFileRequest, CommitFileResponse,
    DeleteFileRequest, Empty, GetFileMetadataRequest, GetFileMetadataResponse, HealthCheckResponse, ListFilesRequest,
    ListFilesResponse, RenameFileRequest, ReplicateLogRequest, UpdateBlockLocationRequest,
};
use dfs_common::{DfsError, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, info};

pub struct CoordinatorServer {
    master: Arc<MasterNode>,
    network: NetworkConfig,
}

impl CoordinatorServer {
    pub fn new(master: Arc<MasterNode>, network: NetworkConfig) -> Self {
        Self { master, network }
    }

    pub async fn serve(self, bind_address: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_address).await?;
        info!("Coordinator gRPC server listening on {}", bind_address);
        self.serve_with_listener(listener).await
    }

    pub async fn serve_with_listener(self, listener: TcpListener) -> Result<()> {
        let limit = self.network.max_message_size as usize;
        let service = CoordinatorGrpcServer::new(CoordinatorService { master: self.master })
            .max_decoding_message_size(limit)
            .max_encoding_message_size(limit);

        Server::builder()
            .add_service(service)
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await?;
        Ok(())
    }
}

struct CoordinatorService {
    master: Arc<MasterNode>,
}

fn status(operation: &str, err: DfsError) -> Status {
    debug!("{} failed: {}", operation, err);
    Status::from(err)
}

#[tonic::async_trait]
impl Coordinator for CoordinatorService {
    async fn allocate_block(
        &self,
        request: Request<AllocateBlockRequest>,
    ) -> std::result::Result<Response<AllocateBlockResponse>, Status> {
        let request = request.into_inner();
        let (block_id, target) = self
            .master
            .allocate_block(&request.project_id, request.size_bytes)
            .await
            .map_err(|e| status("AllocateBlock", e))?;
        Ok(Response::new(AllocateBlockResponse {
            block_id: block_id.to_string(),
            targets: vec![target.into()],
        }))
    }

    async fn commit_file(
        &self,
        request: Request<CommitFileRequest>,
    ) -> std::result::Result<Response<CommitFileResponse>, Status> {
        let inode = self
            .master
            .commit_file(request.into_inner().into())
            .await
            .map_err(|e| status("CommitFile", e))?;
        Ok(Response::new(CommitFileResponse {
            inode: Some(inode.into()),
        }))
    }

    async fn get_file_metadata(
        &self,
        request: Request<GetFileMetadataRequest>,
    ) -> std::result::Result<Response<GetFileMetadataResponse>, Status> {
        let request = request.into_inner();
        let metadata = self
            .master
            .get_file_metadata(&request.project_id, &request.file_path)
            .await
            .map_err(|e| status("GetFileMetadata", e))?;
        Ok(Response::new(metadata.into()))
    }

    async fn list_files(
        &self,
        request: Request<ListFilesRequest>,
    ) -> std::result::Result<Response<ListFilesResponse>, Status> {
        let request = request.into_inner();
        let paths = self
            .master
            .list_files(&request.project_id, &request.prefix)
            .await
            .map_err(|e| status("ListFiles", e))?;
        Ok(Response::new(ListFilesResponse { paths }))
    }

    async fn commit_compaction(
        &self,
        request: Request<CommitCompactionRequest>,
    ) -> std::result::Result<Response<Empty>, Status> {
        let request = request.into_inner();
        let new_file = request
            .new_file
            .ok_or_else(|| Status::invalid_argument("compaction requires the new file"))?;
        self.master
            .commit_compaction(new_file.into(), request.old_file_paths)
            .await
            .map_err(|e| status("CommitCompaction", e))?;
        Ok(Response::new(Empty {}))
    }

    async fn update_block_location(
        &self,
        request: Request<UpdateBlockLocationRequest>,
    ) -> std::result::Result<Response<Empty>, Status> {
        let request = request.into_inner();
        self.master
            .update_block_location(&request.block_id, &request.worker_id)
            .await
            .map_err(|e| status("UpdateBlockLocation", e))?;
        Ok(Response::new(Empty {}))
    }

    async fn delete_file(&self, request: Request<DeleteFileRequest>) -> std::result::Result<Response<Empty>, Status> {
        let request = request.into_inner();
        self.master
            .delete_file(&request.project_id, &request.file_path)
            .await
            .map_err(|e| status("DeleteFile", e))?;
        Ok(Response::new(Empty {}))
    }

    async fn rename_file(&self, request: Request<RenameFileRequest>) -> std::result::Result<Response<Empty>, Status> {
        let request = request.into_inner();
        self.master
            .rename_file(&request.project_id, &request.from_path, &request.to_path)
            .await
            .map_err(|e| status("RenameFile", e))?;
        Ok(Response::new(Empty {}))
    }

    async fn replicate_log(
        &self,
        request: Request<ReplicateLogRequest>,
    ) -> std::result::Result<Response<Empty>, Status> {
        self.master
            .apply_replicated(&request.into_inner().entry)
            .await
            .map_err(|e| status("ReplicateLog", e))?;
        Ok(Response::new(Empty {}))
    }

    async fn health_check(&self, _request: Request<Empty>) -> std::result::Result<Response<HealthCheckResponse>, Status> {
        let node_id = self
            .master
            .health_check()
            .await
            .map_err(|e| status("HealthCheck", e))?;
        Ok(Response::new(HealthCheckResponse { node_id }))
    }
}
