use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Named permission group a user belongs to.
///
/// The Spanish group names used by the original user directory parse to the
/// same roles.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumString,
    EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum Role {
    #[strum(to_string = "Admin", serialize = "Administrador")]
    Admin,
    #[strum(to_string = "Engineering", serialize = "Ingeniería", serialize = "Ingenieria")]
    Engineering,
    #[strum(to_string = "Technician", serialize = "Técnico", serialize = "Tecnico")]
    Technician,
}

/// Pipeline action gated by the authorization policy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumString,
    EnumIter,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Action {
    View,
    Upload,
    Process,
    EditRecord,
    DeleteRecord,
    CreateRecord,
}

/// Identity of the caller as seen by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub username: String,
    pub roles: Vec<Role>,
}

impl UserContext {
    pub fn new(username: impl Into<String>, roles: Vec<Role>) -> Self {
        Self {
            username: username.into(),
            roles,
        }
    }

    /// Build from raw group names, dropping any that are not known roles.
    pub fn from_group_names<I, S>(username: impl Into<String>, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let roles = groups
            .into_iter()
            .filter_map(|g| g.as_ref().trim().parse::<Role>().ok())
            .collect();
        Self::new(username, roles)
    }

    pub fn anonymous() -> Self {
        Self::new("", Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spanish_group_names_parse() {
        assert_eq!("Ingeniería".parse::<Role>().unwrap(), Role::Engineering);
        assert_eq!("Técnico".parse::<Role>().unwrap(), Role::Technician);
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
    }

    #[test]
    fn test_unknown_groups_are_dropped() {
        let user = UserContext::from_group_names("luis", ["Comercial", "Técnico", ""]);
        assert_eq!(user.roles, vec![Role::Technician]);
    }

    #[test]
    fn test_role_display_uses_canonical_name() {
        assert_eq!(Role::Engineering.to_string(), "Engineering");
    }

    #[test]
    fn test_action_names() {
        assert_eq!(Action::EditRecord.to_string(), "editRecord");
        assert_eq!("createRecord".parse::<Action>().unwrap(), Action::CreateRecord);
        assert_eq!(Action::View.as_ref(), "view");
    }
}
