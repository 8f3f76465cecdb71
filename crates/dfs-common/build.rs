//! Generates the gRPC service stubs for the coordinator and data-node APIs.
//!
//! Messages are plain prost structs in `src/proto.rs`, so only the service
//! plumbing is generated here and no protoc is required.

use tonic_build::manual::{Builder, Method, Service};

const CODEC: &str = "tonic::codec::ProstCodec";

fn unary(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::proto::{}", input))
        .output_type(format!("crate::proto::{}", output))
        .codec_path(CODEC)
        .build()
}

fn main() {
    let coordinator = Service::builder()
        .name("Coordinator")
        .package("dfs")
        .method(unary("allocate_block", "AllocateBlock", "AllocateBlockRequest", "AllocateBlockResponse"))
        .method(unary("commit_file", "CommitFile", "CommitFileRequest", "CommitFileResponse"))
        .method(unary(
            "get_file_metadata",
            "GetFileMetadata",
            "GetFileMetadataRequest",
            "GetFileMetadataResponse",
        ))
        .method(unary("list_files", "ListFiles", "ListFilesRequest", "ListFilesResponse"))
        .method(unary("commit_compaction", "CommitCompaction", "CommitCompactionRequest", "Empty"))
        .method(unary(
            "update_block_location",
            "UpdateBlockLocation",
            "UpdateBlockLocationRequest",
            "Empty",
        ))
        .method(unary("delete_file", "DeleteFile", "DeleteFileRequest", "Empty"))
        .method(unary("rename_file", "RenameFile", "RenameFileRequest", "Empty"))
        .method(unary("replicate_log", "ReplicateLog", "ReplicateLogRequest", "Empty"))
        .method(unary("health_check", "HealthCheck", "Empty", "HealthCheckResponse"))
        .build();

    let data_node = Service::builder()
        .name("DataNode")
        .package("dfs")
        .method(
            Method::builder()
                .name("push_block")
                .route_name("PushBlock")
                .input_type("crate::proto::PushBlockRequest")
                .output_type("crate::proto::PushBlockResponse")
                .codec_path(CODEC)
                .client_streaming()
                .build(),
        )
        .method(
            Method::builder()
                .name("fetch_block")
                .route_name("FetchBlock")
                .input_type("crate::proto::BlockIdRequest")
                .output_type("crate::proto::FetchBlockResponse")
                .codec_path(CODEC)
                .server_streaming()
                .build(),
        )
        .method(unary("get_worker_info", "GetWorkerInfo", "Empty", "WorkerInfoResponse"))
        .method(unary(
            "get_block_checksum",
            "GetBlockChecksum",
            "BlockIdRequest",
            "BlockChecksumResponse",
        ))
        .method(unary("delete_block", "DeleteBlock", "BlockIdRequest", "Empty"))
        .method(unary("health_check", "HealthCheck", "Empty", "Empty"))
        .build();

    Builder::new().compile(&[coordinator, data_node]);
}
