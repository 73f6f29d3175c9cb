//! Role to capability policy.

use async_graphql::SimpleObject;
use serde::{Deserialize, Serialize};

use crate::models::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SimpleObject)]
pub struct Capabilities {
    pub can_manage_users: bool,
    pub can_view_all_tickets: bool,
}

/// Fixed capability set for each role.
pub const fn capabilities_for(role: Role) -> Capabilities {
    match role {
        Role::Administrador => Capabilities {
            can_manage_users: true,
            can_view_all_tickets: true,
        },
        Role::Tecnico => Capabilities {
            can_manage_users: false,
            can_view_all_tickets: true,
        },
        Role::Cliente => Capabilities {
            can_manage_users: false,
            can_view_all_tickets: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_role_maps_to_its_capabilities() {
        let admin = capabilities_for(Role::Administrador);
        assert!(admin.can_manage_users && admin.can_view_all_tickets);

        let tech = capabilities_for(Role::Tecnico);
        assert!(!tech.can_manage_users);
        assert!(tech.can_view_all_tickets);

        let client = capabilities_for(Role::Cliente);
        assert!(!client.can_manage_users);
        assert!(!client.can_view_all_tickets);
    }
}
