use dashmap::DashMap;
use indexmap::IndexSet;

use crate::id::{ComponentId, ComponentRef, ServiceId};

/// Reverse edges: which components reference each service.
///
/// Kept apart from the nodes so that nodes never point back at their
/// referrers. Entries may exist for ids that no longer, or not yet, name a
/// service.
#[derive(Debug, Default)]
pub(crate) struct ReferenceIndex {
    referrers: DashMap<ServiceId, IndexSet<ComponentRef>>,
}

impl ReferenceIndex {
    pub(crate) fn add(&self, target: &ServiceId, referrer: ComponentRef) -> bool {
        self.referrers
            .entry(target.clone())
            .or_default()
            .insert(referrer)
    }

    pub(crate) fn remove(&self, target: &ServiceId, referrer: &ComponentRef) -> bool {
        let removed = self
            .referrers
            .get_mut(target)
            .is_some_and(|mut referrers| referrers.shift_remove(referrer));

        self.referrers
            .remove_if(target, |_, referrers| referrers.is_empty());

        removed
    }

    pub(crate) fn remove_everywhere(&self, referrer: &ComponentRef) {
        self.referrers.retain(|_, referrers| {
            referrers.shift_remove(referrer);
            !referrers.is_empty()
        });
    }

    pub(crate) fn referrers(&self, target: &ServiceId) -> Vec<ComponentRef> {
        self.referrers
            .get(target)
            .map(|referrers| referrers.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn service_referrers(&self, target: &ServiceId) -> Vec<ServiceId> {
        self.referrers
            .get(target)
            .map(|referrers| {
                referrers
                    .iter()
                    .filter_map(ComponentRef::as_service)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn component_referrers(&self, target: &ServiceId) -> Vec<ComponentId> {
        self.referrers
            .get(target)
            .map(|referrers| {
                referrers
                    .iter()
                    .filter_map(ComponentRef::as_component)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
