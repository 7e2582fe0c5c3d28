//! # Management Surface
//!
//! Instance lifecycle, queries, and purge, delegating straight to the
//! orchestration service. None of these endpoints touch the dispatcher
//! core; raise/terminate/suspend/resume are expressed as task messages
//! carrying the corresponding history event.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, info};
use uuid::Uuid;

use sidecar_shared::models::{EventKind, HistoryEvent, OrchestrationInstance};
use sidecar_shared::proto::v1 as pb;
use sidecar_shared::proto::v1::task_hub_management_service_server::TaskHubManagementService;
use sidecar_shared::SidecarResult;

use crate::grpc::conversions;
use crate::service::{InstanceQuery, NewInstanceRequest, OrchestrationService, PurgeFilter, TaskMessage};

/// The management gRPC service.
pub struct ManagementApi {
    service: Arc<dyn OrchestrationService>,
}

impl ManagementApi {
    pub fn new(service: Arc<dyn OrchestrationService>) -> Self {
        Self { service }
    }

    fn instance_response(
        metadata: Option<crate::service::OrchestrationMetadata>,
        include_payloads: bool,
    ) -> pb::GetInstanceResponse {
        match metadata {
            Some(metadata) => {
                let mut state = conversions::metadata_to_proto(&metadata);
                if !include_payloads {
                    state.input = None;
                    state.output = None;
                    state.custom_status = None;
                }
                pb::GetInstanceResponse {
                    exists: true,
                    state: Some(state),
                }
            }
            None => pb::GetInstanceResponse {
                exists: false,
                state: None,
            },
        }
    }
}

impl std::fmt::Debug for ManagementApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagementApi").finish()
    }
}

#[tonic::async_trait]
impl TaskHubManagementService for ManagementApi {
    async fn create_task_hub(
        &self,
        request: Request<pb::CreateTaskHubRequest>,
    ) -> Result<Response<pb::CreateTaskHubResponse>, Status> {
        let request = request.into_inner();
        info!(
            recreate_if_exists = request.recreate_if_exists,
            "Creating task hub"
        );
        self.service
            .create_task_hub(request.recreate_if_exists)
            .await?;
        Ok(Response::new(pb::CreateTaskHubResponse {}))
    }

    async fn delete_task_hub(
        &self,
        _request: Request<pb::DeleteTaskHubRequest>,
    ) -> Result<Response<pb::DeleteTaskHubResponse>, Status> {
        info!("Deleting task hub");
        self.service.delete_task_hub().await?;
        Ok(Response::new(pb::DeleteTaskHubResponse {}))
    }

    async fn start_instance(
        &self,
        request: Request<pb::StartInstanceRequest>,
    ) -> Result<Response<pb::StartInstanceResponse>, Status> {
        let request = request.into_inner();
        let instance_id = if request.instance_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            request.instance_id
        };

        let scheduled_start_time = request
            .scheduled_start_time
            .as_ref()
            .map(conversions::timestamp_to_datetime)
            .transpose()
            .map_err(Status::from)?;

        info!(instance_id = %instance_id, name = %request.name, "Starting orchestration instance");
        self.service
            .create_instance(NewInstanceRequest {
                instance: OrchestrationInstance::started(&instance_id),
                name: request.name,
                version: request.version,
                input: request.input,
                scheduled_start_time,
            })
            .await?;

        Ok(Response::new(pb::StartInstanceResponse { instance_id }))
    }

    async fn terminate_instance(
        &self,
        request: Request<pb::TerminateInstanceRequest>,
    ) -> Result<Response<pb::TerminateInstanceResponse>, Status> {
        let request = request.into_inner();
        info!(instance_id = %request.instance_id, "Terminating orchestration instance");
        self.service
            .force_terminate(&request.instance_id, request.reason, request.recurse)
            .await?;
        Ok(Response::new(pb::TerminateInstanceResponse {}))
    }

    async fn raise_event(
        &self,
        request: Request<pb::RaiseEventRequest>,
    ) -> Result<Response<pb::RaiseEventResponse>, Status> {
        let request = request.into_inner();
        debug!(
            instance_id = %request.instance_id,
            event = %request.name,
            "Raising event"
        );
        self.service
            .send_task_message(TaskMessage {
                target: OrchestrationInstance::new(request.instance_id, ""),
                event: HistoryEvent::new(
                    -1,
                    EventKind::EventRaised {
                        name: request.name,
                        input: request.input,
                    },
                ),
            })
            .await?;
        Ok(Response::new(pb::RaiseEventResponse {}))
    }

    async fn suspend_instance(
        &self,
        request: Request<pb::SuspendInstanceRequest>,
    ) -> Result<Response<pb::SuspendInstanceResponse>, Status> {
        let request = request.into_inner();
        info!(instance_id = %request.instance_id, "Suspending orchestration instance");
        self.service
            .send_task_message(TaskMessage {
                target: OrchestrationInstance::new(request.instance_id, ""),
                event: HistoryEvent::new(
                    -1,
                    EventKind::ExecutionSuspended {
                        reason: request.reason,
                    },
                ),
            })
            .await?;
        Ok(Response::new(pb::SuspendInstanceResponse {}))
    }

    async fn resume_instance(
        &self,
        request: Request<pb::ResumeInstanceRequest>,
    ) -> Result<Response<pb::ResumeInstanceResponse>, Status> {
        let request = request.into_inner();
        info!(instance_id = %request.instance_id, "Resuming orchestration instance");
        self.service
            .send_task_message(TaskMessage {
                target: OrchestrationInstance::new(request.instance_id, ""),
                event: HistoryEvent::new(
                    -1,
                    EventKind::ExecutionResumed {
                        reason: request.reason,
                    },
                ),
            })
            .await?;
        Ok(Response::new(pb::ResumeInstanceResponse {}))
    }

    async fn get_instance(
        &self,
        request: Request<pb::GetInstanceRequest>,
    ) -> Result<Response<pb::GetInstanceResponse>, Status> {
        let request = request.into_inner();
        let metadata = self.service.get_instance(&request.instance_id).await?;
        Ok(Response::new(Self::instance_response(
            metadata,
            request.include_payloads,
        )))
    }

    async fn wait_for_instance_start(
        &self,
        request: Request<pb::WaitForInstanceRequest>,
    ) -> Result<Response<pb::GetInstanceResponse>, Status> {
        let request = request.into_inner();
        debug!(instance_id = %request.instance_id, "Waiting for instance start");
        // Dropping the request future (client disconnect) drops this wait.
        let metadata = self
            .service
            .wait_for_instance_start(&request.instance_id, &CancellationToken::new())
            .await?;
        Ok(Response::new(Self::instance_response(
            Some(metadata),
            request.include_payloads,
        )))
    }

    async fn wait_for_instance_completion(
        &self,
        request: Request<pb::WaitForInstanceRequest>,
    ) -> Result<Response<pb::GetInstanceResponse>, Status> {
        let request = request.into_inner();
        debug!(instance_id = %request.instance_id, "Waiting for instance completion");
        let metadata = self
            .service
            .wait_for_instance_completion(&request.instance_id, &CancellationToken::new())
            .await?;
        Ok(Response::new(Self::instance_response(
            Some(metadata),
            request.include_payloads,
        )))
    }

    async fn query_instances(
        &self,
        request: Request<pb::QueryInstancesRequest>,
    ) -> Result<Response<pb::QueryInstancesResponse>, Status> {
        let request = request.into_inner();
        let statuses = request
            .statuses
            .iter()
            .map(|status| conversions::status_from_proto(*status))
            .collect::<SidecarResult<Vec<_>>>()
            .map_err(Status::from)?;

        let query = InstanceQuery {
            statuses,
            created_from: request
                .created_from
                .as_ref()
                .map(conversions::timestamp_to_datetime)
                .transpose()
                .map_err(Status::from)?,
            created_to: request
                .created_to
                .as_ref()
                .map(conversions::timestamp_to_datetime)
                .transpose()
                .map_err(Status::from)?,
            name_prefix: request.name_prefix,
            page_size: (request.page_size > 0).then_some(request.page_size),
        };

        let states = self.service.query_instances(query).await?;
        Ok(Response::new(pb::QueryInstancesResponse {
            states: states.iter().map(conversions::metadata_to_proto).collect(),
        }))
    }

    async fn purge_instances(
        &self,
        request: Request<pb::PurgeInstancesRequest>,
    ) -> Result<Response<pb::PurgeInstancesResponse>, Status> {
        let request = request.into_inner();
        let statuses = request
            .statuses
            .iter()
            .map(|status| conversions::status_from_proto(*status))
            .collect::<SidecarResult<Vec<_>>>()
            .map_err(Status::from)?;

        let filter = PurgeFilter {
            statuses,
            created_from: request
                .created_from
                .as_ref()
                .map(conversions::timestamp_to_datetime)
                .transpose()
                .map_err(Status::from)?,
            created_to: request
                .created_to
                .as_ref()
                .map(conversions::timestamp_to_datetime)
                .transpose()
                .map_err(Status::from)?,
        };

        let purged_count = self.service.purge_instances(filter).await?;
        info!(purged_count, "Purged orchestration instances");
        Ok(Response::new(pb::PurgeInstancesResponse { purged_count }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::InMemoryOrchestrationService;
    use sidecar_shared::models::OrchestrationStatus;

    fn api() -> (ManagementApi, Arc<InMemoryOrchestrationService>) {
        let service = Arc::new(InMemoryOrchestrationService::new());
        (ManagementApi::new(service.clone()), service)
    }

    #[tokio::test]
    async fn test_start_instance_generates_id_when_empty() {
        let (api, _service) = api();
        let response = api
            .start_instance(Request::new(pb::StartInstanceRequest {
                instance_id: String::new(),
                name: "X".into(),
                version: None,
                input: None,
                scheduled_start_time: None,
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(!response.instance_id.is_empty());
    }

    #[tokio::test]
    async fn test_get_instance_strips_payloads_unless_requested() {
        let (api, service) = api();
        api.start_instance(Request::new(pb::StartInstanceRequest {
            instance_id: "abc".into(),
            name: "X".into(),
            version: None,
            input: Some("secret".into()),
            scheduled_start_time: None,
        }))
        .await
        .unwrap();
        assert!(service.get_instance("abc").await.unwrap().is_some());

        let bare = api
            .get_instance(Request::new(pb::GetInstanceRequest {
                instance_id: "abc".into(),
                include_payloads: false,
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(bare.exists);
        assert!(bare.state.unwrap().input.is_none());

        let full = api
            .get_instance(Request::new(pb::GetInstanceRequest {
                instance_id: "abc".into(),
                include_payloads: true,
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(full.state.unwrap().input.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn test_get_unknown_instance_reports_not_exists() {
        let (api, _service) = api();
        let response = api
            .get_instance(Request::new(pb::GetInstanceRequest {
                instance_id: "ghost".into(),
                include_payloads: false,
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(!response.exists);
        assert!(response.state.is_none());
    }

    #[tokio::test]
    async fn test_terminate_then_query_by_status() {
        let (api, _service) = api();
        api.start_instance(Request::new(pb::StartInstanceRequest {
            instance_id: "abc".into(),
            name: "X".into(),
            version: None,
            input: None,
            scheduled_start_time: None,
        }))
        .await
        .unwrap();

        api.terminate_instance(Request::new(pb::TerminateInstanceRequest {
            instance_id: "abc".into(),
            reason: Some("operator".into()),
            recurse: false,
        }))
        .await
        .unwrap();

        let response = api
            .query_instances(Request::new(pb::QueryInstancesRequest {
                statuses: vec![pb::OrchestrationStatus::Terminated as i32],
                created_from: None,
                created_to: None,
                name_prefix: None,
                page_size: 0,
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.states.len(), 1);
        assert_eq!(
            conversions::status_from_proto(response.states[0].status).unwrap(),
            OrchestrationStatus::Terminated
        );

        let purged = api
            .purge_instances(Request::new(pb::PurgeInstancesRequest {
                statuses: vec![],
                created_from: None,
                created_to: None,
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(purged.purged_count, 1);
    }

    #[tokio::test]
    async fn test_raise_event_to_unknown_instance_is_not_found() {
        let (api, _service) = api();
        let err = api
            .raise_event(Request::new(pb::RaiseEventRequest {
                instance_id: "ghost".into(),
                name: "signal".into(),
                input: None,
            }))
            .await
            .expect_err("unknown instance");
        assert_eq!(err.code(), tonic::Code::NotFound);
    }
}
