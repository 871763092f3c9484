//! FailureService implementation.

use super::{parse_id, ShardManagerService};
use crate::pb::failure_service_server::FailureService;
use crate::pb::{ReportFailureRequest, ReportFailureResponse};
use tonic::{Request, Response, Status};

#[tonic::async_trait]
impl FailureService for ShardManagerService {
    async fn report_failure(
        &self,
        request: Request<ReportFailureRequest>,
    ) -> Result<Response<ReportFailureResponse>, Status> {
        let req = request.into_inner();
        let entity_id = parse_id("entity ID", &req.id)?;
        let details: serde_json::Value = serde_json::from_str(&req.details)
            .map_err(|err| Status::invalid_argument(format!("invalid failure details: {err}")))?;

        self.registry
            .store()
            .report_failure(&req.r#type, entity_id, details)
            .await?;

        Ok(Response::new(ReportFailureResponse {
            success: true,
            message: "failure reported successfully".to_string(),
        }))
    }
}
