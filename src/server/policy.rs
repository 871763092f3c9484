//! PolicyService implementation.

use super::ShardManagerService;
use crate::model::PolicyRecord;
use crate::pb::policy_service_server::PolicyService;
use crate::pb::{GetPolicyRequest, GetPolicyResponse, SetPolicyRequest, SetPolicyResponse};
use tonic::{Request, Response, Status};

#[tonic::async_trait]
impl PolicyService for ShardManagerService {
    async fn set_policy(
        &self,
        request: Request<SetPolicyRequest>,
    ) -> Result<Response<SetPolicyResponse>, Status> {
        let req = request.into_inner();
        if req.policy_type.is_empty() {
            return Err(Status::invalid_argument("policy type is required"));
        }
        let parameters: serde_json::Value = serde_json::from_str(&req.parameters)
            .map_err(|err| Status::invalid_argument(format!("invalid policy parameters: {err}")))?;

        let mut record = PolicyRecord::new(req.policy_type, parameters);
        self.registry.store().set_policy(&mut record).await?;

        Ok(Response::new(SetPolicyResponse {
            success: true,
            message: "policy set successfully".to_string(),
        }))
    }

    async fn get_policy(
        &self,
        request: Request<GetPolicyRequest>,
    ) -> Result<Response<GetPolicyResponse>, Status> {
        let req = request.into_inner();
        let record = self
            .registry
            .store()
            .get_policy(&req.policy_type)
            .await?
            .ok_or_else(|| Status::not_found("policy not found"))?;

        Ok(Response::new(GetPolicyResponse {
            policy_type: record.policy_type,
            parameters: record.parameters.to_string(),
        }))
    }
}
