use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexSet;
use tracing::{debug, info, trace, warn};
use weir_scheduler::{Task, TaskError, TaskHandle, TaskScheduler};

use super::ServiceProvider;
use crate::error::{ControllerResult, Error};
use crate::id::ServiceId;
use crate::lifecycle::{Fault, FaultKind, ServiceState};
use crate::node::{Refusal, ServiceNode};
use crate::ordering;
use crate::property::PropertyStore;
use crate::validation::ValidationStatus;

/// How a branch step ended up with its task.
enum Claim {
    /// This call moved the node to enabling.
    Initiated,
    /// Another caller owns the node; the task waits for it.
    Joined,
    /// The node's dependencies changed before it could be claimed.
    Rejected(Error),
}

impl<S> ServiceProvider<S>
where
    S: TaskScheduler,
{
    /// Enables a disabled service.
    ///
    /// Every dependency of the service must already be enabled or enabling.
    /// One task is submitted per element of the service's enabling branch,
    /// each gated on the one before it, so activation waits for dependencies
    /// that are still coming up. Returns the handle of the service's own task.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` unless disabled or when a dependency is
    /// neither enabled nor enabling, `UnresolvedReference`, or `Invalid`.
    pub fn enable_controller_service(&self, id: &ServiceId) -> ControllerResult<TaskHandle> {
        let node = self.node(id)?;
        let state = node.state();
        if state != ServiceState::Disabled {
            return Err(Error::invalid_state(
                id,
                format!("cannot enable a service that is {state}"),
            ));
        }
        let will_enable = HashSet::new();
        self.verify_can_enable(&node, &will_enable)?;

        let subgraph = self.dependency_subgraph([Arc::clone(&node)]);
        let branch = ordering::enabling_branch(&subgraph, &node);

        let mut initiated = IndexSet::new();
        let last = self.submit_enabling_branch(&branch, &will_enable, &mut initiated);

        match last {
            Some((handle, _)) if initiated.contains(id) => Ok(handle),
            Some((_, Claim::Rejected(error))) => Err(error),
            _ => Err(Error::invalid_state(
                id,
                "another caller started enabling the service",
            )),
        }
    }

    /// Enables several services at once.
    ///
    /// Services that are already enabling or enabled are skipped. A
    /// dependency may be disabled if it is part of the same request. Returns
    /// the services whose transition this call started.
    ///
    /// # Errors
    ///
    /// As for [`enable_controller_service`](Self::enable_controller_service).
    /// All services are checked before any task is submitted.
    pub fn enable_controller_services(&self, ids: &[ServiceId]) -> ControllerResult<Vec<ServiceId>> {
        let nodes = ids
            .iter()
            .map(|id| self.node(id))
            .collect::<ControllerResult<Vec<_>>>()?;

        self.enable_services(nodes)
    }

    /// Enables every disabled service that references `id`, directly or
    /// through other services.
    ///
    /// Safe to call concurrently, including with itself: every service ends
    /// up enabling or enabled, and none is ever observed going back to
    /// disabled because of the overlap. Returns the services whose
    /// transition this call started.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` unless `id` is enabling or enabled, or any
    /// error [`enable_controller_service`](Self::enable_controller_service)
    /// reports for a referrer.
    pub fn enable_referencing_services(&self, id: &ServiceId) -> ControllerResult<Vec<ServiceId>> {
        let node = self.node(id)?;
        let state = node.state();
        if !state.is_active() {
            return Err(Error::invalid_state(
                id,
                format!("cannot enable referencing services while the service is {state}"),
            ));
        }

        self.enable_services(self.find_recursive_references(id))
    }

    fn enable_services(&self, nodes: Vec<Arc<ServiceNode>>) -> ControllerResult<Vec<ServiceId>> {
        let mut targets = Vec::new();
        for node in nodes {
            match node.state() {
                ServiceState::Disabled => targets.push(node),
                ServiceState::Enabling | ServiceState::Enabled => {
                    trace!("Controller service {} is already active", node.id());
                }
                ServiceState::Disabling => {
                    return Err(Error::invalid_state(
                        node.id(),
                        "cannot enable a service that is DISABLING",
                    ));
                }
            }
        }

        let will_enable: HashSet<ServiceId> = targets.iter().map(|n| n.id().clone()).collect();
        for node in &targets {
            self.verify_can_enable(node, &will_enable)?;
        }

        let count = targets.len();
        let subgraph = self.dependency_subgraph(targets);
        let branches = ordering::determine_enabling_order(&subgraph);

        let mut initiated = IndexSet::new();
        for branch in branches.iter().take(count) {
            self.submit_enabling_branch(branch, &will_enable, &mut initiated);
        }

        Ok(initiated.into_iter().collect())
    }

    /// Precondition check run on the caller's thread.
    fn verify_can_enable(
        &self,
        node: &ServiceNode,
        will_enable: &HashSet<ServiceId>,
    ) -> ControllerResult<()> {
        let properties = node.properties();

        for (name, value) in properties.iter() {
            let Some(reference) = value.service_id() else {
                continue;
            };
            let Some(dependency) = self.get(reference) else {
                return Err(Error::UnresolvedReference {
                    id: node.id().clone(),
                    property: name.to_string(),
                    reference: reference.clone(),
                });
            };

            let state = dependency.state();
            if !state.is_active() && !will_enable.contains(reference) {
                return Err(Error::invalid_state(
                    node.id(),
                    format!("referenced service {reference} is {state}"),
                ));
            }
        }

        if let ValidationStatus::Invalid(reasons) = self.validation_for(node, &properties) {
            return Err(Error::Invalid {
                id: node.id().clone(),
                reasons,
            });
        }

        Ok(())
    }

    /// Submits one task per branch element, each gated on the previous.
    ///
    /// Returns the last element's task and how it was claimed.
    fn submit_enabling_branch(
        &self,
        branch: &[Arc<ServiceNode>],
        will_enable: &HashSet<ServiceId>,
        initiated: &mut IndexSet<ServiceId>,
    ) -> Option<(TaskHandle, Claim)> {
        let mut previous: Option<(TaskHandle, Claim)> = None;
        for node in branch {
            let gate = previous.take().map(|(handle, _)| handle);
            previous = Some(self.submit_enable_step(node, gate, will_enable, initiated));
        }

        previous
    }

    /// Claims `node` and submits its activation, or, if someone else owns the
    /// node, submits a task that only succeeds once the node is enabled.
    fn submit_enable_step(
        &self,
        node: &Arc<ServiceNode>,
        gate: Option<TaskHandle>,
        will_enable: &HashSet<ServiceId>,
        initiated: &mut IndexSet<ServiceId>,
    ) -> (TaskHandle, Claim) {
        let claim = node.begin_transition(
            ServiceState::Disabled,
            ServiceState::Enabling,
            &self.lifecycle,
            |properties| self.verify_dependencies_up(node.id(), properties, will_enable),
            || {
                let task = self.enable_task(node);
                self.scheduler.submit(gate_on(task, gate.clone()))
            },
        );

        let refusal = match claim {
            Ok(handle) => {
                info!("Enabling controller service {}", node.id());
                initiated.insert(node.id().clone());
                return (handle, Claim::Initiated);
            }
            Err(refusal) => refusal,
        };

        let mut task = self.confirm_enabled_task(node);
        let claim = match refusal {
            Refusal::Busy {
                in_flight: Some(in_flight),
                ..
            } => {
                task = task.gated_on(in_flight);
                Claim::Joined
            }
            Refusal::Rejected(error) => {
                debug!("Not enabling controller service {}: {}", node.id(), error);
                Claim::Rejected(error)
            }
            Refusal::Busy { .. } | Refusal::Removed => Claim::Joined,
        };

        (self.scheduler.submit(gate_on(task, gate)), claim)
    }

    /// Dependency check made while claiming a node. A dependency that started
    /// disabling since the caller's precondition check rejects the claim.
    fn verify_dependencies_up(
        &self,
        id: &ServiceId,
        properties: &PropertyStore,
        will_enable: &HashSet<ServiceId>,
    ) -> ControllerResult<()> {
        for reference in properties.references() {
            if reference == id {
                continue;
            }

            let state = self
                .get(reference)
                .map_or(ServiceState::Disabled, |dependency| dependency.state());
            let up = match state {
                ServiceState::Enabling | ServiceState::Enabled => true,
                ServiceState::Disabled => will_enable.contains(reference),
                ServiceState::Disabling => false,
            };
            if !up {
                return Err(Error::invalid_state(
                    id,
                    format!("referenced service {reference} is {state}"),
                ));
            }
        }

        Ok(())
    }

    fn enable_task(&self, node: &Arc<ServiceNode>) -> Task {
        let provider = self.clone();
        let target = Arc::clone(node);
        let aborted = Arc::clone(node);

        Task::new(format!("enable {}", node.id()), async move {
            provider.activate(&target).await
        })
        .on_abort(move |reason| {
            warn!("Enabling controller service {} aborted: {}", aborted.id(), reason);
            aborted.complete_transition(
                ServiceState::Enabling,
                ServiceState::Disabled,
                Some(Fault::new(FaultKind::Aborted, reason)),
            );
        })
    }

    fn confirm_enabled_task(&self, node: &Arc<ServiceNode>) -> Task {
        let target = Arc::clone(node);

        Task::new(format!("confirm enabled {}", node.id()), async move {
            match target.state() {
                ServiceState::Enabled => Ok(()),
                state => Err(TaskError::new(format!(
                    "controller service {} is {state}",
                    target.id()
                ))),
            }
        })
    }

    async fn activate(&self, node: &ServiceNode) -> Result<(), TaskError> {
        if let Err(reason) = self.dependencies_enabled(node) {
            warn!("Cannot enable controller service {}: {}", node.id(), reason);
            node.complete_transition(
                ServiceState::Enabling,
                ServiceState::Disabled,
                Some(Fault::new(FaultKind::Activation, reason.clone())),
            );
            return Err(TaskError::new(reason));
        }

        let context = self.activation_context(node);
        match node.implementation().activate(&context).await {
            Ok(()) => {
                if node.complete_transition(ServiceState::Enabling, ServiceState::Enabled, None) {
                    info!("Enabled controller service {}", node.id());
                }
                Ok(())
            }
            Err(error) => {
                warn!("Failed to enable controller service {}: {}", node.id(), error);
                if self.config.deactivate_on_failed_activation {
                    if let Err(cleanup) = node.implementation().deactivate(&context).await {
                        debug!(
                            "Cleanup after failed activation of {} also failed: {}",
                            node.id(),
                            cleanup
                        );
                    }
                }
                node.complete_transition(
                    ServiceState::Enabling,
                    ServiceState::Disabled,
                    Some(Fault::new(FaultKind::Activation, error.to_string())),
                );
                Err(TaskError::new(format!(
                    "activation of controller service {} failed: {error}",
                    node.id()
                )))
            }
        }
    }

    /// Every direct dependency must be enabled by the time activation runs.
    fn dependencies_enabled(&self, node: &ServiceNode) -> Result<(), String> {
        for reference in node.references() {
            let Some(dependency) = self.get(&reference) else {
                return Err(format!("referenced service {reference} does not exist"));
            };

            let state = dependency.state();
            if state != ServiceState::Enabled {
                return Err(format!("referenced service {reference} is {state}"));
            }
        }

        Ok(())
    }
}

fn gate_on(task: Task, gate: Option<TaskHandle>) -> Task {
    match gate {
        Some(gate) => task.gated_on(gate),
        None => task,
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::super::tests::provider;
    use crate::lifecycle::ServiceState;

    #[tokio::test]
    #[traced_test]
    async fn test_stale_activation_is_not_reported_as_enabled() {
        let provider = provider();
        let node = provider
            .create_controller_service("plain", "cache", false)
            .unwrap();

        provider.activate(&node).await.unwrap();

        assert_eq!(node.state(), ServiceState::Disabled);
        assert!(logs_contain("expected to be ENABLING"));
        assert!(!logs_contain("Enabled controller service cache"));
    }
}
