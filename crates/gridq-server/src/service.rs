//! gRPC service implementation for `JobLeaseService`.

use std::pin::Pin;
use std::sync::Arc;

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::info;

use gridq_auth::AuthService;

use crate::proto;
use crate::proto::job_lease_service_server::{JobLeaseService, JobLeaseServiceServer};
use crate::session::{LeaseSession, SessionContext, SessionRegistry};

/// gRPC front end over the lease subsystem.
pub struct LeaseServer {
    ctx: Arc<SessionContext>,
    sessions: Arc<SessionRegistry>,
    auth: Option<Arc<AuthService>>,
}

impl LeaseServer {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self {
            ctx,
            sessions: Arc::new(SessionRegistry::new()),
            auth: None,
        }
    }

    /// Require bearer-token authentication on every RPC.
    pub fn with_auth(mut self, auth: Arc<AuthService>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Get the tonic service for mounting on a gRPC server.
    pub fn into_service(self) -> JobLeaseServiceServer<Self> {
        JobLeaseServiceServer::new(self)
    }

    async fn authorize(&self, metadata: &tonic::metadata::MetadataMap) -> Result<(), Status> {
        if let Some(auth) = &self.auth {
            auth.authenticate_request(metadata)
                .await
                .map_err(Status::from)?;
        }
        Ok(())
    }
}

#[tonic::async_trait]
impl JobLeaseService for LeaseServer {
    type StreamingLeaseJobsStream =
        Pin<Box<dyn Stream<Item = Result<proto::StreamingJobLease, Status>> + Send>>;

    async fn streaming_lease_jobs(
        &self,
        request: Request<Streaming<proto::StreamingLeaseRequest>>,
    ) -> Result<Response<Self::StreamingLeaseJobsStream>, Status> {
        self.authorize(request.metadata()).await?;
        let inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(64);
        let session = LeaseSession::new(self.ctx.clone(), self.sessions.clone());
        tokio::spawn(session.run(inbound, tx));
        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    /// One-shot variant: a degenerate one-message session. Delivery is
    /// assumed at the call boundary, so the returned jobs are marked
    /// delivered immediately.
    async fn lease_jobs(
        &self,
        request: Request<proto::LeaseRequest>,
    ) -> Result<Response<proto::JobLease>, Status> {
        self.authorize(request.metadata()).await?;
        let req = request.into_inner();
        let cluster_id = req.cluster_id.clone();
        let streaming = proto::StreamingLeaseRequest {
            cluster_id: req.cluster_id,
            pool: req.pool,
            resources: req.resources,
            cluster_leased_report: req.cluster_leased_report,
            minimum_job_size: req.minimum_job_size,
            nodes: req.nodes,
            received_job_ids: vec![],
        };

        let (tx, mut rx) = mpsc::channel(self.ctx.max_batch_size * 2 + 16);
        let mut session = LeaseSession::new(self.ctx.clone(), self.sessions.clone());
        session
            .handle_message(streaming, &tx)
            .await
            .map_err(Status::from)?;
        drop(session);
        drop(tx);

        let mut jobs = Vec::new();
        while let Some(msg) = rx.recv().await {
            if let Ok(lease) = msg {
                if let Some(job) = lease.job {
                    jobs.push(job);
                }
            }
        }
        let ids: Vec<String> = jobs.iter().map(|j| j.id.clone()).collect();
        self.ctx
            .lifecycle
            .mark_delivered(&cluster_id, &ids)
            .map_err(Status::from)?;
        info!(%cluster_id, jobs = jobs.len(), "one-shot lease served");
        Ok(Response::new(proto::JobLease { jobs }))
    }

    async fn renew_lease(
        &self,
        request: Request<proto::RenewLeaseRequest>,
    ) -> Result<Response<proto::IdList>, Status> {
        self.authorize(request.metadata()).await?;
        let req = request.into_inner();
        let ids = self
            .ctx
            .lifecycle
            .renew(&req.cluster_id, &req.ids)
            .map_err(Status::from)?;
        Ok(Response::new(proto::IdList { ids }))
    }

    async fn return_lease(
        &self,
        request: Request<proto::ReturnLeaseRequest>,
    ) -> Result<Response<proto::Empty>, Status> {
        self.authorize(request.metadata()).await?;
        let req = request.into_inner();
        let avoid = req.avoid_node_labels.into_iter().collect();
        self.ctx
            .lifecycle
            .return_lease(&req.cluster_id, &req.job_id, avoid, &req.reason)
            .map_err(Status::from)?;
        Ok(Response::new(proto::Empty {}))
    }

    async fn report_done(
        &self,
        request: Request<proto::IdList>,
    ) -> Result<Response<proto::IdList>, Status> {
        self.authorize(request.metadata()).await?;
        let req = request.into_inner();
        let ids = self.ctx.lifecycle.report_done(&req.ids).map_err(Status::from)?;
        Ok(Response::new(proto::IdList { ids }))
    }
}
