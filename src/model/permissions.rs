use serde::Serialize;
use strum_macros::Display;
use utoipa::ToSchema;

use crate::model::role::Role;

/// Capability flags granted to a role.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, ToSchema)]
pub struct Permissions {
    pub can_view_dashboard: bool,
    pub can_view_financials: bool,
    pub can_manage_projects: bool,
    pub can_delete_projects: bool,
    pub can_view_safe: bool,
    pub can_manage_safe: bool,
    pub can_manage_employees: bool,
    pub can_view_salaries: bool,
    pub can_manage_payroll: bool,
    pub can_manage_contractors: bool,
    pub can_submit_expenses: bool,
    pub can_approve_expenses: bool,
    pub can_view_reports: bool,
    pub can_export_reports: bool,
    pub can_manage_users: bool,
    pub can_edit_settings: bool,
}

/// A single flag of [`Permissions`], used by handlers to ask for access.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
    ViewDashboard,
    ViewFinancials,
    ManageProjects,
    DeleteProjects,
    ViewSafe,
    ManageSafe,
    ManageEmployees,
    ViewSalaries,
    ManagePayroll,
    ManageContractors,
    SubmitExpenses,
    ApproveExpenses,
    ViewReports,
    ExportReports,
    ManageUsers,
    EditSettings,
}

const ADMIN: Permissions = Permissions {
    can_view_dashboard: true,
    can_view_financials: true,
    can_manage_projects: true,
    can_delete_projects: true,
    can_view_safe: true,
    can_manage_safe: true,
    can_manage_employees: true,
    can_view_salaries: true,
    can_manage_payroll: true,
    can_manage_contractors: true,
    can_submit_expenses: true,
    can_approve_expenses: true,
    can_view_reports: true,
    can_export_reports: true,
    can_manage_users: true,
    can_edit_settings: true,
};

// Enters operational data, never sees money figures.
const DATA_ENTRY: Permissions = Permissions {
    can_view_dashboard: true,
    can_view_financials: false,
    can_manage_projects: true,
    can_delete_projects: false,
    can_view_safe: false,
    can_manage_safe: true,
    can_manage_employees: true,
    can_view_salaries: false,
    can_manage_payroll: false,
    can_manage_contractors: true,
    can_submit_expenses: true,
    can_approve_expenses: false,
    can_view_reports: false,
    can_export_reports: false,
    can_manage_users: false,
    can_edit_settings: false,
};

// Read-only view over everything.
const PARTNERS: Permissions = Permissions {
    can_view_dashboard: true,
    can_view_financials: true,
    can_manage_projects: false,
    can_delete_projects: false,
    can_view_safe: true,
    can_manage_safe: false,
    can_manage_employees: false,
    can_view_salaries: true,
    can_manage_payroll: false,
    can_manage_contractors: false,
    can_submit_expenses: false,
    can_approve_expenses: false,
    can_view_reports: true,
    can_export_reports: true,
    can_manage_users: false,
    can_edit_settings: false,
};

impl Permissions {
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Admin => ADMIN,
            Role::DataEntry => DATA_ENTRY,
            Role::Partners => PARTNERS,
        }
    }

    pub fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::ViewDashboard => self.can_view_dashboard,
            Capability::ViewFinancials => self.can_view_financials,
            Capability::ManageProjects => self.can_manage_projects,
            Capability::DeleteProjects => self.can_delete_projects,
            Capability::ViewSafe => self.can_view_safe,
            Capability::ManageSafe => self.can_manage_safe,
            Capability::ManageEmployees => self.can_manage_employees,
            Capability::ViewSalaries => self.can_view_salaries,
            Capability::ManagePayroll => self.can_manage_payroll,
            Capability::ManageContractors => self.can_manage_contractors,
            Capability::SubmitExpenses => self.can_submit_expenses,
            Capability::ApproveExpenses => self.can_approve_expenses,
            Capability::ViewReports => self.can_view_reports,
            Capability::ExportReports => self.can_export_reports,
            Capability::ManageUsers => self.can_manage_users,
            Capability::EditSettings => self.can_edit_settings,
        }
    }

    /// Salary figures need both salary and general money visibility.
    pub fn sees_salaries(&self) -> bool {
        self.can_view_financials && self.can_view_salaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    const ALL: [Capability; 16] = [
        Capability::ViewDashboard,
        Capability::ViewFinancials,
        Capability::ManageProjects,
        Capability::DeleteProjects,
        Capability::ViewSafe,
        Capability::ManageSafe,
        Capability::ManageEmployees,
        Capability::ViewSalaries,
        Capability::ManagePayroll,
        Capability::ManageContractors,
        Capability::SubmitExpenses,
        Capability::ApproveExpenses,
        Capability::ViewReports,
        Capability::ExportReports,
        Capability::ManageUsers,
        Capability::EditSettings,
    ];

    fn is_mutation(cap: Capability) -> bool {
        let name = cap.to_string();
        ["manage_", "delete_", "submit_", "approve_", "edit_"]
            .iter()
            .any(|p| name.starts_with(p))
    }

    #[test]
    fn admin_is_granted_everything() {
        let perms = Permissions::for_role(Role::Admin);
        assert!(ALL.iter().all(|c| perms.allows(*c)));
    }

    #[test]
    fn data_entry_never_sees_financial_figures() {
        let perms = Permissions::for_role(Role::DataEntry);
        assert!(!perms.can_view_financials);
        assert!(!perms.can_view_safe);
        assert!(!perms.can_view_salaries);
        assert!(!perms.can_view_reports);
        assert!(!perms.sees_salaries());
    }

    #[test]
    fn partners_can_read_but_never_mutate() {
        let perms = Permissions::for_role(Role::Partners);
        for cap in ALL.iter().copied().filter(|c| is_mutation(*c)) {
            assert!(!perms.allows(cap), "partners must not have {cap}");
        }
        assert!(perms.can_view_financials);
        assert!(perms.can_view_reports);
        assert!(perms.sees_salaries());
    }

    #[test]
    fn every_role_has_a_matrix_and_dashboard_access() {
        for role in Role::iter() {
            assert!(Permissions::for_role(role).can_view_dashboard);
        }
    }

    #[test]
    fn capability_names_match_flag_names() {
        let json = serde_json::to_value(Permissions::for_role(Role::Admin)).unwrap();
        for cap in ALL {
            let flag = format!("can_{cap}");
            assert!(json.get(&flag).is_some(), "missing flag {flag}");
        }
    }
}
