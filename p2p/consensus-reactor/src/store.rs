//! The block store, consumed as a [`tower::Service`].
//!
//! Serving a lagging peer means reading committed data: block metadata,
//! individual parts and the stored (extended) commits. All reads are
//! treated as racy (the store may prune, or still be writing), so every
//! helper maps failure to [`None`] and the caller retries after a short
//! sleep.
use std::future::Future;

use tower::ServiceExt;

use galena_types::{BlockMeta, Commit, ExtendedCommit, Height, Part};

/// A read request to the block store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockStoreRequest {
    /// The lowest height the store still has.
    Base,
    /// The highest committed height.
    Height,
    /// The metadata of the block at a height.
    BlockMeta(Height),
    /// One part of the block at a height.
    BlockPart { height: Height, index: u32 },
    /// The commit stored for a height.
    Commit(Height),
    /// The extended commit stored for a height.
    ExtendedCommit(Height),
}

/// A response from the block store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockStoreResponse {
    Base(Height),
    Height(Height),
    BlockMeta(Option<BlockMeta>),
    BlockPart(Option<Part>),
    Commit(Option<Commit>),
    ExtendedCommit(Option<ExtendedCommit>),
}

/// Shorthand for the block store service bounds.
pub trait BlockStore:
    tower::Service<
        BlockStoreRequest,
        Response = BlockStoreResponse,
        Error = tower::BoxError,
        Future = Self::Future2,
    > + Clone
    + Send
    + Sync
    + 'static
{
    // This allows us to put more restrictive bounds on the future without
    // defining the future here explicitly.
    type Future2: Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;
}

impl<T> BlockStore for T
where
    T: tower::Service<BlockStoreRequest, Response = BlockStoreResponse, Error = tower::BoxError>
        + Clone
        + Send
        + Sync
        + 'static,
    T::Future: Future<Output = Result<Self::Response, Self::Error>> + Send + 'static,
{
    type Future2 = T::Future;
}

async fn call<B: BlockStore>(store: &B, request: BlockStoreRequest) -> Option<BlockStoreResponse> {
    match store.clone().oneshot(request).await {
        Ok(response) => Some(response),
        Err(error) => {
            tracing::debug!("block store read failed: {error}");
            None
        }
    }
}

pub(crate) async fn base<B: BlockStore>(store: &B) -> Option<Height> {
    let BlockStoreResponse::Base(height) = call(store, BlockStoreRequest::Base).await? else {
        panic!("block store returned wrong response for request");
    };
    Some(height)
}

pub(crate) async fn height<B: BlockStore>(store: &B) -> Option<Height> {
    let BlockStoreResponse::Height(height) = call(store, BlockStoreRequest::Height).await? else {
        panic!("block store returned wrong response for request");
    };
    Some(height)
}

pub(crate) async fn block_meta<B: BlockStore>(store: &B, at: Height) -> Option<BlockMeta> {
    let BlockStoreResponse::BlockMeta(meta) =
        call(store, BlockStoreRequest::BlockMeta(at)).await?
    else {
        panic!("block store returned wrong response for request");
    };
    meta
}

pub(crate) async fn block_part<B: BlockStore>(store: &B, at: Height, index: u32) -> Option<Part> {
    let BlockStoreResponse::BlockPart(part) =
        call(store, BlockStoreRequest::BlockPart { height: at, index }).await?
    else {
        panic!("block store returned wrong response for request");
    };
    part
}

pub(crate) async fn commit<B: BlockStore>(store: &B, at: Height) -> Option<Commit> {
    let BlockStoreResponse::Commit(commit) = call(store, BlockStoreRequest::Commit(at)).await?
    else {
        panic!("block store returned wrong response for request");
    };
    commit
}

pub(crate) async fn extended_commit<B: BlockStore>(
    store: &B,
    at: Height,
) -> Option<ExtendedCommit> {
    let BlockStoreResponse::ExtendedCommit(commit) =
        call(store, BlockStoreRequest::ExtendedCommit(at)).await?
    else {
        panic!("block store returned wrong response for request");
    };
    commit
}
