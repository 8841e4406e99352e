use serde::{Deserialize, Serialize};

use crate::approvals::resolver::{ApproverResolver, GrantBasis};
use crate::domain::approval::ApprovalInstance;
use crate::domain::user::UserContext;

/// Why an instance was shown to a viewer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityBasis {
    Submitter,
    AdminOverride,
    CurrentApprover,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VisibilityReport<T> {
    pub visible: Vec<T>,
    pub hidden: usize,
    /// Instances shown only because the viewer is a super admin.
    pub admin_overrides: usize,
}

/// Read-side gate for approval listings and detail views.
///
/// Pending instances are shown to their submitter, to admins, and to whoever
/// is eligible for the current step's node. Terminal instances have no current
/// node, so only the submitter and admins see them.
#[derive(Clone, Copy, Debug, Default)]
pub struct VisibilityFilter {
    resolver: ApproverResolver,
}

impl VisibilityFilter {
    pub fn new(resolver: ApproverResolver) -> Self {
        Self { resolver }
    }

    pub fn visibility(
        &self,
        instance: &ApprovalInstance,
        viewer: &UserContext,
    ) -> Option<VisibilityBasis> {
        if instance.submitter_id == viewer.id {
            return Some(VisibilityBasis::Submitter);
        }
        if let Some(node) = instance.current_node().filter(|_| instance.is_pending()) {
            match self.resolver.resolve(node, viewer).basis() {
                Some(GrantBasis::AdminOverride) | None => {}
                Some(_) => return Some(VisibilityBasis::CurrentApprover),
            }
        }
        if viewer.is_super_admin() {
            return Some(VisibilityBasis::AdminOverride);
        }
        None
    }

    pub fn can_view(&self, instance: &ApprovalInstance, viewer: &UserContext) -> bool {
        self.visibility(instance, viewer).is_some()
    }

    pub fn filter_viewable(
        &self,
        instances: Vec<ApprovalInstance>,
        viewer: &UserContext,
    ) -> Vec<ApprovalInstance> {
        self.filter_with_report(instances, viewer, |instance| instance).visible
    }

    /// Filters any list whose items wrap an instance, counting what was hidden
    /// and how many items were admitted by the admin override.
    pub fn filter_with_report<T, F>(
        &self,
        items: Vec<T>,
        viewer: &UserContext,
        instance_of: F,
    ) -> VisibilityReport<T>
    where
        F: Fn(&T) -> &ApprovalInstance,
    {
        let total = items.len();
        let mut admin_overrides = 0;
        let visible: Vec<T> = items
            .into_iter()
            .filter(|item| match self.visibility(instance_of(item), viewer) {
                Some(VisibilityBasis::AdminOverride) => {
                    admin_overrides += 1;
                    true
                }
                Some(_) => true,
                None => false,
            })
            .collect();

        VisibilityReport { hidden: total - visible.len(), visible, admin_overrides }
    }
}
