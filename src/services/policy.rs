//! Role-to-action authorization matrix.
//!
//! This decides which controls a client shows. The backend re-checks every
//! mutating call on its own; a denied action here never replaces that check.

use strum::IntoEnumIterator;

use crate::error::PipelineError;
use crate::models::access::{Action, Role, UserContext};

/// Notice shown in place of the import screens when `view` is denied.
pub const NO_ACCESS_NOTICE: &str = "You do not have permission to access this section.";

/// Evaluate a single role. An absent role is denied everything.
pub fn can_perform_role(role: Option<Role>, action: Action) -> bool {
    let Some(role) = role else {
        return false;
    };

    match (role, action) {
        (Role::Admin, _) => true,
        (Role::Engineering, Action::View | Action::Upload | Action::Process | Action::EditRecord) => {
            true
        }
        (Role::Technician, Action::View) => true,
        _ => false,
    }
}

/// Evaluate a role set; any role that permits the action grants it.
pub fn can_perform(roles: &[Role], action: Action) -> bool {
    roles.iter().any(|role| can_perform_role(Some(*role), action))
}

/// Fail with [`PipelineError::Forbidden`] unless `user` may perform `action`.
pub fn require(user: &UserContext, action: Action) -> Result<(), PipelineError> {
    if can_perform(&user.roles, action) {
        Ok(())
    } else {
        tracing::debug!(user = %user.username, action = %action, "action denied by policy");
        Err(PipelineError::Forbidden(action))
    }
}

/// Every action the user may invoke, in declaration order.
pub fn allowed_actions(user: &UserContext) -> Vec<Action> {
    Action::iter()
        .filter(|action| can_perform(&user.roles, *action))
        .collect()
}

/// The denial notice to render instead of failing, if the user cannot view.
pub fn access_notice(user: &UserContext) -> Option<&'static str> {
    (!can_perform(&user.roles, Action::View)).then_some(NO_ACCESS_NOTICE)
}
